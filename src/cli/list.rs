use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend, print_output};
use crate::config::Opts;
use crate::store::TemplateStore;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = TemplateStore::open_existing(&opts.conf_dir)?;
        let records = store.identities()?;

        print_output(self.output_format, &records, |records| {
            for r in records {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    r.profile.key,
                    r.profile.name,
                    r.profile.faculty.as_deref().unwrap_or("-"),
                    r.profile.program.as_deref().unwrap_or("-"),
                    r.templates.len()
                );
            }
        })
    }
}
