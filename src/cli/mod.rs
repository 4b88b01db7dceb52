mod attend;
mod delete;
mod enroll;
mod import;
mod list;
pub mod server;
mod show;
mod verify;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

pub use attend::*;
pub use delete::*;
pub use enroll::*;
pub use import::*;
pub use list::*;
pub use server::*;
pub use show::*;
pub use verify::*;

use anyhow::{Context, bail};
use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;

use crate::config::{ConfDir, MatchOptions, Opts, PipelineOptions};
use crate::feedback::{Feedback, LineFeedback, LogFeedback};
use crate::station::Station;
use crate::store::TemplateStore;
use crate::vein::Pipeline;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 身份键的默认格式：10 位学号
pub const DEFAULT_KEY_PATTERN: &str = "^[A-Z0-9]{10}$";

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

/// 按格式输出，表格格式由调用方提供
pub(crate) fn print_output<T: Serialize>(
    format: OutputFormat,
    value: &T,
    table: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Table => table(value),
    }
    Ok(())
}

/// 去掉空白并转为大写，然后检查格式
pub(crate) fn normalize_key(key: &str, pattern: &str) -> anyhow::Result<String> {
    let key = key.trim().to_uppercase();
    let re = Regex::new(pattern).with_context(|| format!("无效的正则表达式: {}", pattern))?;
    if !re.is_match(&key) {
        bail!("身份键 {} 不符合格式 {}", key, pattern);
    }
    Ok(key)
}

/// 状态输出端：指定路径时逐行写入（例如串口设备），否则写日志
pub(crate) fn feedback_sink(path: Option<&Path>) -> anyhow::Result<Box<dyn Feedback>> {
    match path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法打开状态输出: {}", path.display()))?;
            Ok(Box::new(LineFeedback::new(file)))
        }
        None => Ok(Box::new(LogFeedback)),
    }
}

pub(crate) fn open_station(
    conf: &ConfDir,
    pipeline: &PipelineOptions,
    matching: &MatchOptions,
    feedback: Option<&Path>,
) -> anyhow::Result<Station> {
    let pipeline = Pipeline::new(pipeline.clone());
    let store = Arc::new(TemplateStore::open(conf, pipeline.dim())?);
    Ok(Station::new(pipeline, store, matching.clone()).with_feedback(feedback_sink(feedback)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(" a123456789 ", DEFAULT_KEY_PATTERN).unwrap(), "A123456789");
        assert!(normalize_key("A12345", DEFAULT_KEY_PATTERN).is_err());
        assert!(normalize_key("../../etc/x", DEFAULT_KEY_PATTERN).is_err());
    }
}
