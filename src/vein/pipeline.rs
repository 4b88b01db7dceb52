use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use opencv::core::Mat;

use super::features::{self, Embedder, FeatureLayout};
use super::{Enhanced, Frame, Roi, Skeleton, VesselMap, enhance, roi, segment, vessel};
use crate::config::PipelineOptions;
use crate::error::Result;
use crate::metrics;
use crate::utils;
use crate::vector::FeatureVector;

/// 特征提取流水线
///
/// 只保存配置与可选的嵌入模型，自身无状态，可以在线程间共享。
#[derive(Clone)]
pub struct Pipeline {
    opts: PipelineOptions,
    embedder: Option<Arc<dyn Embedder>>,
}

/// 每个阶段的中间结果，用于逐步查看
pub struct StageImages {
    pub roi: Roi,
    pub enhanced: Enhanced,
    pub vessels: VesselMap,
    pub binary: Mat,
    pub skeleton: Skeleton,
    /// 骨架为空时为 `Err`，此时前面的阶段仍然可以查看
    pub vector: Result<FeatureVector>,
}

impl StageImages {
    /// 将每个阶段的图像保存为 `<dir>/<阶段名>.png`
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        for (name, mat) in [
            ("roi", self.roi.mat()),
            ("enhanced", self.enhanced.mat()),
            ("vessels", self.vessels.mat()),
            ("binary", &self.binary),
            ("skeleton", self.skeleton.mat()),
        ] {
            utils::imwrite(dir.join(format!("{}.png", name)), mat)?;
        }
        Ok(())
    }
}

impl Pipeline {
    pub fn new(opts: PipelineOptions) -> Self {
        Self { opts, embedder: None }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.opts
    }

    /// 输出向量的维度
    pub fn dim(&self) -> usize {
        let base = self.opts.layout.dim(self.opts.roi_size, self.opts.grid_cell);
        base + self.embedder.as_ref().map_or(0, |e| e.dim())
    }

    fn layout_label(&self) -> &'static str {
        match self.opts.layout {
            FeatureLayout::Compact => "compact",
            FeatureLayout::Extended => "extended",
        }
    }

    /// 从原始图像提取特征向量，任意阶段失败都会直接返回
    pub fn extract(&self, frame: &Frame) -> Result<FeatureVector> {
        let start = Instant::now();

        let roi = roi::isolate(frame, &self.opts)?;
        let enhanced = enhance::enhance(&roi, &self.opts)?;
        let vessels = vessel::enhance_vessels(&enhanced, &self.opts)?;
        let skeleton = segment::segment(&vessels, &self.opts)?;
        let vector = features::vectorize(&skeleton, &self.opts, self.embedder.as_deref())?;

        let elapsed = start.elapsed();
        debug!("特征提取完成: {} 维, 耗时 {:.2?}", vector.dim(), elapsed);
        metrics::observe_pipeline_duration(self.layout_label(), elapsed.as_secs_f64());
        Ok(vector)
    }

    /// 运行流水线并保留每个阶段的图像
    pub fn trace(&self, frame: &Frame) -> Result<StageImages> {
        let roi = roi::isolate(frame, &self.opts)?;
        let enhanced = enhance::enhance(&roi, &self.opts)?;
        let vessels = vessel::enhance_vessels(&enhanced, &self.opts)?;
        let binary = segment::binarize(&vessels, &self.opts)?;
        let skeleton = segment::skeletonize(&binary, &self.opts)?;
        let vector = features::vectorize(&skeleton, &self.opts, self.embedder.as_deref());
        Ok(StageImages { roi, enhanced, vessels, binary, skeleton, vector })
    }
}
