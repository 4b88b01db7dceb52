use std::f64::consts::PI;

use clap::ValueEnum;
use opencv::core::{self, Mat, Point, Rect, Size, Vec4i, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use super::Skeleton;
use crate::config::PipelineOptions;
use crate::error::{PalmError, Result};
use crate::utils;
use crate::vector::FeatureVector;

/// 邻域计数卷积核中心的权重
const CENTER_WEIGHT: f32 = 10.;
/// 融合时手工特征的权重
pub const HANDCRAFTED_WEIGHT: f32 = 2.0;
/// 融合时外部嵌入的权重
pub const EMBEDDING_WEIGHT: f32 = 0.5;

const COARSE_GRID: i32 = 4;
const GABOR_ANGLES: usize = 8;
const GABOR_KERNEL: i32 = 15;
const ORIENTATION_BINS: usize = 8;
const CENTER_BLOCK: i32 = 64;

/// 特征向量布局
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureLayout {
    /// 端点数、分叉点数与固定大小网格的骨架密度
    Compact,
    /// 拓扑计数、4x4 密度、Gabor 方向能量、直线统计与中心区域标准差
    Extended,
}

impl FeatureLayout {
    /// 给定 ROI 边长时的特征维度
    pub fn dim(&self, roi_size: i32, grid_cell: i32) -> usize {
        match self {
            Self::Compact => {
                let cells = (roi_size + grid_cell - 1) / grid_cell;
                2 + (cells * cells) as usize
            }
            Self::Extended => {
                2 + (COARSE_GRID * COARSE_GRID) as usize + GABOR_ANGLES + 2 + ORIENTATION_BINS + 1
            }
        }
    }
}

/// 外部图像嵌入模型，例如冻结权重的分类网络
pub trait Embedder: Send + Sync {
    /// 嵌入向量的维度
    fn dim(&self) -> usize;

    fn embed(&self, skeleton: &Skeleton) -> Result<Vec<f32>>;
}

/// 将骨架转换为归一化的特征向量
///
/// 骨架没有任何前景像素时返回 [`PalmError::InsufficientVeinData`]。
/// 配置了嵌入模型时，手工特征与嵌入分别归一化并加权后拼接，再整体归一化。
pub fn vectorize(
    skeleton: &Skeleton,
    opts: &PipelineOptions,
    embedder: Option<&dyn Embedder>,
) -> Result<FeatureVector> {
    let mat = skeleton.mat();
    if core::count_non_zero(mat)? == 0 {
        return Err(PalmError::InsufficientVeinData);
    }

    let values = match opts.layout {
        FeatureLayout::Compact => compact(mat, opts.grid_cell)?,
        FeatureLayout::Extended => extended(mat)?,
    };
    let handcrafted = FeatureVector::normalized(values);

    match embedder {
        Some(embedder) => {
            let embedding = FeatureVector::new(embedder.embed(skeleton)?);
            Ok(FeatureVector::concat([
                handcrafted.weighted(HANDCRAFTED_WEIGHT),
                embedding.weighted(EMBEDDING_WEIGHT),
            ]))
        }
        None => Ok(handcrafted),
    }
}

/// 统计骨架端点与分叉点数量，返回 `(端点, 分叉点)`
///
/// 中心权重为 10、邻域权重为 1 的卷积核下，前景像素的响应为 `10 + 邻居数`：
/// 恰好一个邻居为端点，三个及以上为分叉点。
pub fn topology_counts(skeleton: &Mat) -> Result<(usize, usize)> {
    let mut binary = Mat::default();
    skeleton.convert_to(&mut binary, core::CV_32F, 1. / 255., 0.)?;

    #[rustfmt::skip]
    let weights = [
        1., 1., 1.,
        1., CENTER_WEIGHT, 1.,
        1., 1., 1.,
    ];
    let kernel = utils::mat_from_f32(3, 3, &weights)?;
    let mut response = Mat::default();
    imgproc::filter_2d(
        &binary,
        &mut response,
        core::CV_32F,
        &kernel,
        Point::new(-1, -1),
        0.,
        core::BORDER_CONSTANT,
    )?;

    let mut endpoints = 0;
    let mut bifurcations = 0;
    for r in utils::pixels_f32(&response)? {
        let r = r.round();
        if r == CENTER_WEIGHT + 1. {
            endpoints += 1;
        } else if r >= CENTER_WEIGHT + 3. {
            bifurcations += 1;
        }
    }
    Ok((endpoints, bifurcations))
}

fn compact(skeleton: &Mat, cell: i32) -> Result<Vec<f32>> {
    let (endpoints, bifurcations) = topology_counts(skeleton)?;
    let mut features = vec![endpoints as f32 / 1000., bifurcations as f32 / 1000.];

    let (rows, cols) = (skeleton.rows(), skeleton.cols());
    for y in (0..rows).step_by(cell as usize) {
        for x in (0..cols).step_by(cell as usize) {
            // 边缘处不完整的单元按实际面积计算
            let rect = Rect::new(x, y, cell.min(cols - x), cell.min(rows - y));
            features.push(density(skeleton, rect)?);
        }
    }
    Ok(features)
}

fn extended(skeleton: &Mat) -> Result<Vec<f32>> {
    let (endpoints, bifurcations) = topology_counts(skeleton)?;
    let mut features = vec![bifurcations as f32 / 100., endpoints as f32 / 100.];

    let (rows, cols) = (skeleton.rows(), skeleton.cols());
    let (cell_h, cell_w) = (rows / COARSE_GRID, cols / COARSE_GRID);
    for i in 0..COARSE_GRID {
        for j in 0..COARSE_GRID {
            features.push(density(skeleton, Rect::new(j * cell_w, i * cell_h, cell_w, cell_h))?);
        }
    }

    features.extend(gabor_energies(skeleton)?);
    features.extend(line_statistics(skeleton)?);
    features.push(center_deviation(skeleton)?);
    Ok(features)
}

/// 区域内前景像素占比
fn density(skeleton: &Mat, rect: Rect) -> Result<f32> {
    if rect.width <= 0 || rect.height <= 0 {
        return Ok(0.);
    }
    let cell = Mat::roi(skeleton, rect)?.try_clone()?;
    Ok(core::count_non_zero(&cell)? as f32 / rect.area() as f32)
}

/// 8 个方向的 Gabor 滤波响应强度
fn gabor_energies(skeleton: &Mat) -> Result<Vec<f32>> {
    let mut image = Mat::default();
    skeleton.convert_to(&mut image, core::CV_32F, 1., 0.)?;
    let size = (skeleton.rows() * skeleton.cols()) as f32;

    (0..GABOR_ANGLES)
        .map(|i| -> Result<f32> {
            let theta = PI * i as f64 / GABOR_ANGLES as f64;
            let size = Size::new(GABOR_KERNEL, GABOR_KERNEL);
            let kernel = imgproc::get_gabor_kernel_def(size, 3., theta, 10., 0.5)?;
            let mut filtered = Mat::default();
            imgproc::filter_2d_def(&image, &mut filtered, core::CV_32F, &kernel)?;
            let energy: f32 = utils::pixels_f32(&filtered)?.iter().map(|v| v.abs()).sum();
            Ok(energy / size)
        })
        .collect()
}

/// 概率霍夫直线的平均长度、数量与方向直方图
fn line_statistics(skeleton: &Mat) -> Result<Vec<f32>> {
    let mut lines = Vector::<Vec4i>::new();
    imgproc::hough_lines_p(skeleton, &mut lines, 1., PI / 180., 20, 15., 10.)?;

    let mut stats = vec![0f32; 2 + ORIENTATION_BINS];
    if lines.is_empty() {
        return Ok(stats);
    }

    let bin_width = 180. / ORIENTATION_BINS as f32;
    let mut total_length = 0.;
    for line in &lines {
        let (dx, dy) = ((line[2] - line[0]) as f32, (line[3] - line[1]) as f32);
        total_length += (dx * dx + dy * dy).sqrt();

        let mut angle = dy.atan2(dx).to_degrees();
        if angle < 0. {
            angle += 180.;
        }
        let bin = (angle / bin_width) as usize % ORIENTATION_BINS;
        stats[2 + bin] += 1.;
    }

    let count = lines.len() as f32;
    stats[0] = total_length / count / 100.;
    stats[1] = count / 100.;
    stats[2..].iter_mut().for_each(|v| *v /= count);
    Ok(stats)
}

/// 图像中心 64x64 区域像素值的标准差
fn center_deviation(skeleton: &Mat) -> Result<f32> {
    let (rows, cols) = (skeleton.rows(), skeleton.cols());
    let (cy, cx) = (rows / 2, cols / 2);
    let half = CENTER_BLOCK / 2;
    let x0 = (cx - half).max(0);
    let y0 = (cy - half).max(0);
    let rect = Rect::new(x0, y0, (cx + half).min(cols) - x0, (cy + half).min(rows) - y0);
    if rect.width <= 0 || rect.height <= 0 {
        return Ok(0.);
    }

    let block = Mat::roi(skeleton, rect)?.try_clone()?;
    let pixels = utils::pixels_u8(&block)?;
    let n = pixels.len() as f32;
    let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / n;
    let var = pixels.iter().map(|&p| (p as f32 - mean).powi(2)).sum::<f32>() / n;
    Ok(var.sqrt() / 255.)
}

#[cfg(test)]
mod tests {
    use opencv::core::Scalar;

    use super::*;

    fn skeleton_with(draw: impl FnOnce(&mut Mat)) -> Skeleton {
        let mut img =
            Mat::new_rows_cols_with_default(128, 128, core::CV_8UC1, Scalar::all(0.)).unwrap();
        draw(&mut img);
        Skeleton::new(img)
    }

    fn segment(img: &mut Mat, from: Point, to: Point) {
        imgproc::line(img, from, to, Scalar::all(255.), 1, imgproc::LINE_8, 0).unwrap();
    }

    fn hline(img: &mut Mat, y: i32, x0: i32, x1: i32) {
        segment(img, Point::new(x0, y), Point::new(x1, y));
    }

    fn vline(img: &mut Mat, x: i32, y0: i32, y1: i32) {
        segment(img, Point::new(x, y0), Point::new(x, y1));
    }

    #[test]
    fn test_line_topology() {
        let skeleton = skeleton_with(|img| hline(img, 64, 10, 110));
        assert_eq!(topology_counts(skeleton.mat()).unwrap(), (2, 0));
    }

    #[test]
    fn test_t_junction_topology() {
        let skeleton = skeleton_with(|img| {
            hline(img, 40, 10, 110);
            vline(img, 60, 41, 100);
        });
        let (endpoints, bifurcations) = topology_counts(skeleton.mat()).unwrap();
        assert_eq!(endpoints, 3);
        assert!(bifurcations >= 1);
    }

    #[test]
    fn test_empty_skeleton_is_insufficient() {
        let skeleton = skeleton_with(|_| {});
        let err = vectorize(&skeleton, &PipelineOptions::default(), None).unwrap_err();
        assert!(matches!(err, PalmError::InsufficientVeinData));
    }

    #[test]
    fn test_compact_layout_dimension() {
        let skeleton = skeleton_with(|img| hline(img, 64, 10, 110));
        let opts = PipelineOptions { roi_size: 128, ..Default::default() };
        let v = vectorize(&skeleton, &opts, None).unwrap();
        assert_eq!(v.dim(), FeatureLayout::Compact.dim(128, 32));
        assert_eq!(v.dim(), 18);
        assert!((v.norm() - 1.).abs() < 1e-5);
        assert_eq!(FeatureLayout::Compact.dim(512, 32), 258);
        // 边长不能整除时边缘单元也计入
        assert_eq!(FeatureLayout::Compact.dim(100, 32), 18);
    }

    #[test]
    fn test_extended_layout_dimension() {
        let skeleton = skeleton_with(|img| {
            hline(img, 64, 10, 110);
            vline(img, 30, 10, 120);
        });
        let opts = PipelineOptions { layout: FeatureLayout::Extended, ..Default::default() };
        let v = vectorize(&skeleton, &opts, None).unwrap();
        assert_eq!(v.dim(), 37);
        assert!((v.norm() - 1.).abs() < 1e-5);
    }

    struct ConstEmbedder;

    impl Embedder for ConstEmbedder {
        fn dim(&self) -> usize {
            4
        }

        fn embed(&self, _: &Skeleton) -> Result<Vec<f32>> {
            Ok(vec![1., 1., 1., 1.])
        }
    }

    #[test]
    fn test_embedding_fusion() {
        let skeleton = skeleton_with(|img| hline(img, 64, 10, 110));
        let opts = PipelineOptions { roi_size: 128, ..Default::default() };
        let v = vectorize(&skeleton, &opts, Some(&ConstEmbedder)).unwrap();
        assert_eq!(v.dim(), 18 + 4);
        assert!((v.norm() - 1.).abs() < 1e-5);

        // 手工部分与嵌入部分的能量之比等于权重平方之比
        let hand: f32 = v.as_slice()[..18].iter().map(|x| x * x).sum();
        let emb: f32 = v.as_slice()[18..].iter().map(|x| x * x).sum();
        assert!((hand / emb - 16.).abs() < 1e-3);
    }

    #[test]
    fn test_vectorize_is_deterministic() {
        let skeleton = skeleton_with(|img| {
            hline(img, 20, 5, 120);
            vline(img, 90, 5, 120);
        });
        let opts = PipelineOptions::default();
        let first = vectorize(&skeleton, &opts, None).unwrap();
        assert_eq!(first, vectorize(&skeleton, &opts, None).unwrap());
    }
}
