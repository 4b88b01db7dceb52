use std::path::PathBuf;

use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend, open_station, print_output};
use crate::config::{MatchOptions, Opts, PipelineOptions, QualityOptions};
use crate::station::FileSource;

#[derive(Parser, Debug, Clone)]
pub struct VerifyCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub quality: QualityOptions,
    /// 待识别的图片，按顺序读取；启用质量门限时使用第一张达标的图片
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
    /// 状态输出文件，例如串口设备
    #[arg(long, value_name = "PATH")]
    pub feedback: Option<PathBuf>,
}

impl SubCommandExtend for VerifyCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let station =
            open_station(&opts.conf_dir, &self.pipeline, &self.matching, self.feedback.as_deref())?
                .with_quality(&self.quality);
        let mut source = FileSource::new(self.images.iter().cloned());
        let decision = block_in_place(|| station.verify(&mut source))?;

        print_output(self.output_format, &decision, |d| println!("{}", d))
    }
}
