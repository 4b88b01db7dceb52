use clap::ValueEnum;
use log::debug;
use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;

use super::enhance::clahe;
use super::{Enhanced, VesselMap};
use crate::config::PipelineOptions;
use crate::error::Result;
use crate::utils;

/// Frangi 滤波中区分管状与块状结构的参数
const FRANGI_BETA: f32 = 0.5;
/// Frangi 滤波中抑制背景噪声的参数
const FRANGI_GAMMA: f32 = 15.;

/// 血管增强方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VesselStrategy {
    /// 椭圆结构元素的黑帽变换，再做一次 CLAHE
    Blackhat,
    /// 多尺度 Hessian 血管滤波（Frangi），逐像素取最大响应
    Vesselness,
}

pub fn enhance_vessels(image: &Enhanced, opts: &PipelineOptions) -> Result<VesselMap> {
    let output = match opts.vessel {
        VesselStrategy::Blackhat => {
            black_hat(image.mat(), opts.vein_kernel, opts.vessel_boost_clip, opts.clahe_tiles)?
        }
        VesselStrategy::Vesselness => vesselness(image.mat(), &opts.vesselness_scales)?,
    };
    Ok(VesselMap::new(output))
}

/// 黑帽变换提取比结构元素细的暗色脊线，结果中静脉为亮色
fn black_hat(src: &Mat, kernel_size: i32, boost_clip: f64, tiles: i32) -> Result<Mat> {
    let kernel = imgproc::get_structuring_element_def(
        imgproc::MORPH_ELLIPSE,
        Size::new(kernel_size, kernel_size),
    )?;
    let mut hat = Mat::default();
    imgproc::morphology_ex_def(src, &mut hat, imgproc::MORPH_BLACKHAT, &kernel)?;

    let boosted = clahe(&hat, boost_clip, tiles)?;
    utils::stretch_to_u8(&boosted)
}

/// 暗色脊线的多尺度 Frangi 响应，线性拉伸到 0~255
fn vesselness(src: &Mat, scales: &[f64]) -> Result<Mat> {
    let mut image = Mat::default();
    src.convert_to(&mut image, core::CV_32F, 1., 0.)?;

    let mut response = vec![0f32; (src.rows() * src.cols()) as usize];
    for &sigma in scales {
        let (dxx, dxy, dyy) = hessian(&image, sigma)?;
        for (i, out) in response.iter_mut().enumerate() {
            *out = out.max(frangi(dxx[i], dxy[i], dyy[i]));
        }
        debug!("vesselness σ={} 完成", sigma);
    }

    utils::stretch_to_u8(&utils::mat_from_f32(src.rows(), src.cols(), &response)?)
}

/// 高斯平滑后的二阶导数，乘以 σ² 做尺度归一化
fn hessian(image: &Mat, sigma: f64) -> Result<(Vec<f32>, Vec<f32>, Vec<f32>)> {
    let mut smooth = Mat::default();
    imgproc::gaussian_blur_def(image, &mut smooth, Size::new(0, 0), sigma)?;

    let scale = (sigma * sigma) as f32;
    let derive = |dx: i32, dy: i32| -> Result<Vec<f32>> {
        let mut d = Mat::default();
        imgproc::sobel_def(&smooth, &mut d, core::CV_32F, dx, dy)?;
        Ok(utils::pixels_f32(&d)?.into_iter().map(|v| v * scale).collect())
    };
    Ok((derive(2, 0)?, derive(1, 1)?, derive(0, 2)?))
}

/// 单个像素的 Frangi 响应
///
/// 特征值按绝对值排序 `|λ1| ≤ |λ2|`，暗色脊线要求 `λ2 > 0`。
fn frangi(dxx: f32, dxy: f32, dyy: f32) -> f32 {
    let trace = dxx + dyy;
    let root = ((dxx - dyy).powi(2) + 4. * dxy * dxy).sqrt();
    let (mut l1, mut l2) = ((trace + root) / 2., (trace - root) / 2.);
    if l1.abs() > l2.abs() {
        std::mem::swap(&mut l1, &mut l2);
    }
    if l2 <= 0. {
        return 0.;
    }

    let rb = l1 / l2;
    let s2 = l1 * l1 + l2 * l2;
    (-rb * rb / (2. * FRANGI_BETA * FRANGI_BETA)).exp()
        * (1. - (-s2 / (2. * FRANGI_GAMMA * FRANGI_GAMMA)).exp())
}

#[cfg(test)]
mod tests {
    use opencv::core::{Point, Scalar};

    use super::*;

    /// 浅色背景上画一条深色竖线
    fn dark_line() -> Enhanced {
        let mut img =
            Mat::new_rows_cols_with_default(96, 96, core::CV_8UC1, Scalar::all(180.)).unwrap();
        let (from, to) = (Point::new(48, 8), Point::new(48, 88));
        imgproc::line(&mut img, from, to, Scalar::all(60.), 5, imgproc::LINE_8, 0).unwrap();
        Enhanced::new(img)
    }

    #[test]
    fn test_frangi_prefers_dark_ridges() {
        // 横向二阶导为正（暗线两侧更亮），纵向接近 0
        assert!(frangi(40., 0., 0.5) > 0.5);
        // 亮线
        assert_eq!(frangi(-40., 0., -0.5), 0.);
        // 平坦区域
        assert!(frangi(0.01, 0., 0.01) < 1e-3);
    }

    #[test]
    fn test_dark_line_becomes_bright() {
        for strategy in [VesselStrategy::Blackhat, VesselStrategy::Vesselness] {
            let opts = PipelineOptions { vessel: strategy, vein_kernel: 15, ..Default::default() };
            let map = enhance_vessels(&dark_line(), &opts).unwrap();
            let px = utils::pixels_u8(map.mat()).unwrap();
            let on_line = px[48 * 96 + 48];
            let background = px[48 * 96 + 10];
            assert!(on_line > background, "{:?}: {} <= {}", strategy, on_line, background);
        }
    }
}
