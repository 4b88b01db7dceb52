mod common;

use std::sync::Arc;

use opencv::core::{self, Mat};
use palmvein::config::PipelineOptions;
use palmvein::error::{PalmError, Result};
use palmvein::matcher::cosine;
use palmvein::vein::{Embedder, FeatureLayout, Frame, Pipeline, Skeleton, roi};
use rstest::*;

fn same_pixels(a: &Mat, b: &Mat) -> bool {
    core::norm2(a, b, core::NORM_INF, &Mat::default()).unwrap() == 0.
}

/// 返回固定向量的嵌入模型
struct ConstEmbedder(usize);

impl Embedder for ConstEmbedder {
    fn dim(&self) -> usize {
        self.0
    }

    fn embed(&self, _: &Skeleton) -> Result<Vec<f32>> {
        Ok(vec![0.5; self.0])
    }
}

#[fixture]
fn pipeline() -> Pipeline {
    Pipeline::new(PipelineOptions::default())
}

#[rstest]
fn black_frame_has_no_hand(pipeline: Pipeline) {
    let result = pipeline.extract(&Frame::new(common::blank()));
    assert!(matches!(result, Err(PalmError::NoHandFound)));
}

#[rstest]
fn extracts_unit_vector(pipeline: Pipeline) {
    let vector = pipeline.extract(&common::hand_frame(1, (0, 0))).unwrap();
    assert_eq!(vector.dim(), 258);
    assert_eq!(vector.dim(), pipeline.dim());
    assert!((vector.norm() - 1.).abs() < 1e-4);
}

#[rstest]
fn extraction_is_deterministic(pipeline: Pipeline) {
    let frame = common::hand_frame(2, (0, 0));
    assert_eq!(pipeline.extract(&frame).unwrap(), pipeline.extract(&frame).unwrap());
}

#[rstest]
fn translation_keeps_features(pipeline: Pipeline) {
    let a = pipeline.extract(&common::hand_frame(3, (0, 0))).unwrap();
    let b = pipeline.extract(&common::hand_frame(3, (6, -4))).unwrap();
    assert!(cosine(&a, &b) > 0.99);
}

#[rstest]
fn same_hand_scores_above_other_hand(pipeline: Pipeline) {
    let query = pipeline.extract(&common::hand_frame(4, (3, 0))).unwrap();
    let same = pipeline.extract(&common::hand_frame(4, (0, 0))).unwrap();
    let other = pipeline.extract(&common::hand_frame(5, (0, 0))).unwrap();
    assert!(cosine(&query, &same) > cosine(&query, &other));
}

#[rstest]
#[case(FeatureLayout::Compact, 258)]
#[case(FeatureLayout::Extended, 37)]
fn layout_dimension(#[case] layout: FeatureLayout, #[case] dim: usize) {
    let pipeline = Pipeline::new(PipelineOptions { layout, ..Default::default() });
    let vector = pipeline.extract(&common::hand_frame(6, (0, 0))).unwrap();
    assert_eq!(vector.dim(), dim);
}

#[rstest]
fn trace_saves_every_stage(pipeline: Pipeline) {
    let dir = tempfile::tempdir().unwrap();
    let stages = pipeline.trace(&common::hand_frame(7, (0, 0))).unwrap();
    assert_eq!(stages.roi.dimensions(), (512, 512));
    assert!(stages.vector.is_ok());

    stages.save(dir.path()).unwrap();
    for name in ["roi", "enhanced", "vessels", "binary", "skeleton"] {
        assert!(dir.path().join(format!("{}.png", name)).exists(), "{} 未保存", name);
    }
}

#[rstest]
fn steep_tilt_is_not_corrected() {
    let frame = Frame::new(common::tilted_hand(8, (0, 0), 45.));
    let default = roi::isolate(&frame, &PipelineOptions::default()).unwrap();
    let never = PipelineOptions { max_tilt: 0., ..Default::default() };
    let unrotated = roi::isolate(&frame, &never).unwrap();
    assert!(same_pixels(default.mat(), unrotated.mat()));

    let always = PipelineOptions { max_tilt: 60., ..Default::default() };
    let rotated = roi::isolate(&frame, &always).unwrap();
    assert!(!same_pixels(rotated.mat(), unrotated.mat()));
}

#[rstest]
fn square_hand_skips_ellipse_fit(pipeline: Pipeline) {
    // 轴对齐矩形的外轮廓只有 4 个点，不足以拟合椭圆
    let frame = Frame::new(common::square_hand(9));
    let roi = roi::isolate(&frame, &PipelineOptions::default()).unwrap();
    assert_eq!(roi.dimensions(), (512, 512));

    let vector = pipeline.extract(&frame).unwrap();
    assert_eq!(vector.dim(), pipeline.dim());
}

#[rstest]
fn embedder_extends_vector(pipeline: Pipeline) {
    let fused = pipeline.clone().with_embedder(Arc::new(ConstEmbedder(16)));
    assert_eq!(fused.dim(), pipeline.dim() + 16);

    let frame = common::hand_frame(10, (0, 0));
    let plain = pipeline.extract(&frame).unwrap();
    let vector = fused.extract(&frame).unwrap();
    assert_eq!(vector.dim(), 258 + 16);
    assert!((vector.norm() - 1.).abs() < 1e-4);

    // 手工特征部分保持原方向，只是被嵌入分量按比例压缩
    let head = &vector.as_slice()[..258];
    let dot: f32 = head.iter().zip(plain.as_slice()).map(|(a, b)| a * b).sum();
    let head_norm = head.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((dot / head_norm - 1.).abs() < 1e-4);
    assert!(vector.as_slice()[258..].iter().all(|x| *x > 0.));
}
