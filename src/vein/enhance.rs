use clap::ValueEnum;
use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;

use super::{Enhanced, Roi};
use crate::config::PipelineOptions;
use crate::error::Result;
use crate::utils;

/// 光照归一化时使用的高斯核尺寸
const ILLUMINATION_KERNEL: i32 = 251;

/// 对比度增强方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enhancement {
    /// 全局直方图均衡化
    Global,
    /// 分块自适应直方图均衡化（CLAHE）
    Clahe,
    /// 先除以大尺度模糊消除光照梯度，再做 CLAHE，适用于未裁剪的原始图像
    Normalized,
}

pub fn enhance(roi: &Roi, opts: &PipelineOptions) -> Result<Enhanced> {
    let src = roi.mat();
    let output = match opts.enhance {
        Enhancement::Global => {
            let mut dst = Mat::default();
            imgproc::equalize_hist(src, &mut dst)?;
            dst
        }
        Enhancement::Clahe => clahe(src, opts.clahe_clip, opts.clahe_tiles)?,
        Enhancement::Normalized => {
            let flat = normalize_illumination(src)?;
            clahe(&flat, opts.clahe_clip, opts.clahe_tiles)?
        }
    };
    Ok(Enhanced::new(output))
}

/// 限制对比度的自适应直方图均衡化
pub fn clahe(src: &Mat, clip: f64, tiles: i32) -> Result<Mat> {
    let mut clahe = imgproc::create_clahe(clip, Size::new(tiles, tiles))?;
    let mut dst = Mat::default();
    clahe.apply(src, &mut dst)?;
    Ok(dst)
}

/// 将图像除以自身的大尺度高斯模糊，再线性拉伸到 0~255
///
/// 背景加 1 后再相除，全黑区域不会出现除零。
pub fn normalize_illumination(src: &Mat) -> Result<Mat> {
    let mut blur = Mat::default();
    imgproc::gaussian_blur_def(
        src,
        &mut blur,
        Size::new(ILLUMINATION_KERNEL, ILLUMINATION_KERNEL),
        0.,
    )?;

    let mut gray = Mat::default();
    src.convert_to(&mut gray, core::CV_32F, 1., 0.)?;
    let mut background = Mat::default();
    blur.convert_to(&mut background, core::CV_32F, 1., 1.)?;

    let mut ratio = Mat::default();
    core::divide2(&gray, &background, &mut ratio, 255., -1)?;
    utils::stretch_to_u8(&ratio)
}

#[cfg(test)]
mod tests {
    use opencv::core::{self, Scalar};

    use super::*;

    fn gradient(rows: i32, cols: i32) -> Mat {
        let data: Vec<u8> =
            (0..rows * cols).map(|i| ((i % cols) * 200 / cols) as u8 + 20).collect();
        utils::mat_from_u8(rows, cols, &data).unwrap()
    }

    #[test]
    fn test_enhance_keeps_size() {
        for method in [Enhancement::Global, Enhancement::Clahe, Enhancement::Normalized] {
            let opts = PipelineOptions { enhance: method, ..Default::default() };
            let out = enhance(&Roi::new(gradient(64, 96)), &opts).unwrap();
            assert_eq!(out.dimensions(), (96, 64));
            assert_eq!(out.mat().typ(), core::CV_8UC1);
        }
    }

    #[test]
    fn test_normalize_flat_image() {
        // 均匀图像除以自身模糊后各处相同，拉伸结果全为 0
        let flat =
            Mat::new_rows_cols_with_default(32, 32, core::CV_8UC1, Scalar::all(90.)).unwrap();
        let out = normalize_illumination(&flat).unwrap();
        assert!(utils::pixels_u8(&out).unwrap().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_normalize_stretches_to_full_range() {
        let out = normalize_illumination(&gradient(64, 96)).unwrap();
        assert_eq!(out.typ(), core::CV_8UC1);
        let px = utils::pixels_u8(&out).unwrap();
        assert_eq!(px.iter().min(), Some(&0));
        assert_eq!(px.iter().max(), Some(&255));
    }
}
