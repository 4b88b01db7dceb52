use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::cli::{DEFAULT_KEY_PATTERN, SubCommandExtend, normalize_key};
use crate::config::{EnrollOptions, MatchOptions, Opts, PipelineOptions};
use crate::enroll::EnrollmentSession;
use crate::error::PalmError;
use crate::store::{IdentityProfile, TemplateStore};
use crate::utils::{self, pb_style};
use crate::vector::FeatureVector;
use crate::vein::{Frame, Pipeline};

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub enroll: EnrollOptions,
    /// 数据目录，每个子目录 `<身份键>/` 中的图片为该身份的样本
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,bmp")]
    pub suffix: String,
    /// 身份键必须满足的正则表达式
    #[arg(long, value_name = "REGEX", default_value = DEFAULT_KEY_PATTERN)]
    pub key_pattern: String,
}

/// 一个待导入的身份
struct Pending {
    key: String,
    images: Vec<PathBuf>,
}

impl SubCommandExtend for ImportCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let re_suf = Regex::new(&format!("(?i)\\.({})$", self.suffix.replace(',', "|")))
            .context("failed to build regex")?;
        let pending = self.scan(&re_suf)?;
        info!("共发现 {} 个身份", pending.len());

        let pipeline = Pipeline::new(self.pipeline.clone());
        let store = Arc::new(TemplateStore::open(&opts.conf_dir, pipeline.dim())?);

        let total = pending.iter().map(|p| p.images.len()).sum::<usize>();
        let pb = ProgressBar::new(total as u64).with_style(pb_style());
        pb.set_prefix("提取特征");

        let mut imported = 0;
        for identity in pending {
            if store.identity_exists(&identity.key)? {
                pb.inc(identity.images.len() as u64);
                pb.println(format!("跳过已登记的身份: {}", identity.key));
                continue;
            }

            let samples = block_in_place(|| extract_all(&pipeline, &identity.images, &pb));
            if samples.is_empty() {
                pb.println(format!("{}: 没有可用的样本", identity.key));
                continue;
            }

            // 导入时以实际可用的样本数为准
            let enroll = EnrollOptions { samples: samples.len() as u32, side: self.enroll.side };
            let profile = IdentityProfile::new(identity.key.clone(), identity.key.clone());
            match block_in_place(|| commit(&store, profile, samples, &enroll, &self.matching)) {
                Ok(()) => imported += 1,
                Err(e) => pb.println(format!("{}: {}", identity.key, e)),
            }
        }
        pb.finish_with_message("完成");
        info!("成功导入 {} 个身份", imported);
        Ok(())
    }
}

impl ImportCommand {
    fn scan(&self, re_suf: &Regex) -> anyhow::Result<Vec<Pending>> {
        let mut pending = vec![];
        for entry in WalkDir::new(&self.path).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let key = match normalize_key(&name, &self.key_pattern) {
                Ok(key) => key,
                Err(e) => {
                    warn!("跳过目录 {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            pending.push(Pending { key, images: list_images(entry.path(), re_suf)? });
        }
        Ok(pending)
    }
}

fn list_images(dir: &Path, re_suf: &Regex) -> anyhow::Result<Vec<PathBuf>> {
    let mut images = vec![];
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && re_suf.is_match(&entry.file_name().to_string_lossy()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

/// 并行提取特征，失败的图片记录后跳过，结果保持文件顺序
fn extract_all(
    pipeline: &Pipeline,
    images: &[PathBuf],
    pb: &ProgressBar,
) -> Vec<(FeatureVector, Frame)> {
    images
        .par_iter()
        .progress_with(pb.clone())
        .filter_map(|path| {
            let result = utils::imread(path)
                .map(Frame::new)
                .and_then(|frame| pipeline.extract(&frame).map(|v| (v, frame)));
            match result {
                Ok(sample) => Some(sample),
                Err(e) => {
                    pb.println(format!("{}: {}", path.display(), e));
                    None
                }
            }
        })
        .collect()
}

fn commit(
    store: &TemplateStore,
    profile: IdentityProfile,
    samples: Vec<(FeatureVector, Frame)>,
    enroll: &EnrollOptions,
    matching: &MatchOptions,
) -> Result<(), PalmError> {
    let mut session = EnrollmentSession::begin(store, profile, enroll, matching)?;
    for (vector, frame) in samples {
        session.add_sample(vector, Some(frame.into_mat()))?;
    }
    session.commit()?;
    Ok(())
}
