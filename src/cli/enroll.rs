use std::path::PathBuf;

use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::{DEFAULT_KEY_PATTERN, SubCommandExtend, normalize_key, open_station};
use crate::config::{EnrollOptions, MatchOptions, Opts, PipelineOptions, QualityOptions};
use crate::station::FileSource;
use crate::store::IdentityProfile;

#[derive(Parser, Debug, Clone)]
pub struct EnrollCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub enroll: EnrollOptions,
    #[command(flatten)]
    pub quality: QualityOptions,
    /// 身份键，例如学号
    pub key: String,
    /// 姓名
    pub name: String,
    /// 样本图片，按顺序采集，无法提取特征的图片会被跳过
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
    /// 学院
    #[arg(long)]
    pub faculty: Option<String>,
    /// 专业
    #[arg(long)]
    pub program: Option<String>,
    /// 身份键必须满足的正则表达式
    #[arg(long, value_name = "REGEX", default_value = DEFAULT_KEY_PATTERN)]
    pub key_pattern: String,
    /// 状态输出文件，例如串口设备
    #[arg(long, value_name = "PATH")]
    pub feedback: Option<PathBuf>,
}

impl SubCommandExtend for EnrollCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let key = normalize_key(&self.key, &self.key_pattern)?;
        let profile = IdentityProfile {
            key,
            name: self.name.trim().to_uppercase(),
            faculty: self.faculty.clone(),
            program: self.program.clone(),
        };

        let station =
            open_station(&opts.conf_dir, &self.pipeline, &self.matching, self.feedback.as_deref())?
                .with_quality(&self.quality);
        let mut source = FileSource::new(self.images.iter().cloned());

        let record = block_in_place(|| station.enroll(&mut source, profile, &self.enroll))?;
        info!(
            "登记完成: {} {}，共 {} 个模板",
            record.profile.key,
            record.profile.name,
            record.templates.len()
        );
        if source.remaining() > 0 {
            info!("剩余 {} 张图片未使用", source.remaining());
        }
        Ok(())
    }
}
