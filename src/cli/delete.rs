use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::TemplateStore;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// 要删除的身份键
    pub key: String,
    /// 不再确认
    #[arg(short, long)]
    pub yes: bool,
}

impl SubCommandExtend for DeleteCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let key = self.key.trim().to_uppercase();
        let store = TemplateStore::open_existing(&opts.conf_dir)?;

        if !self.yes {
            let answer = utils::read_line(&format!("确认删除 {} 及其全部模板？[y/N] ", key))?;
            if !answer.eq_ignore_ascii_case("y") {
                info!("已取消");
                return Ok(());
            }
        }

        store.delete_identity(&key)?;
        Ok(())
    }
}
