use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, PipelineOptions};
use crate::utils;
use crate::vein::{Frame, Pipeline};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    /// 图片路径
    pub image: PathBuf,
    /// 中间图像的输出目录
    pub output: PathBuf,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let pipeline = Pipeline::new(self.pipeline.clone());
        let frame = Frame::new(utils::imread(&self.image)?);

        let stages = block_in_place(|| pipeline.trace(&frame))?;
        stages.save(&self.output)?;
        info!("中间图像已保存到 {}", self.output.display());

        match &stages.vector {
            Ok(vector) => println!("{}", serde_json::to_string(vector)?),
            Err(e) => warn!("无法生成特征向量: {}", e),
        }
        Ok(())
    }
}
