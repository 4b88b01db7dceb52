use log::debug;
use opencv::core::{self, Mat, Point, Rect, Scalar, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;

use super::{Frame, Roi};
use crate::config::PipelineOptions;
use crate::error::{PalmError, Result};
use crate::utils;

/// 拟合椭圆所需的最少轮廓点数
const MIN_ELLIPSE_POINTS: usize = 6;

/// 从原始图像中分离出手掌，校正倾斜后裁剪并缩放到固定尺寸
pub fn isolate(frame: &Frame, opts: &PipelineOptions) -> Result<Roi> {
    let gray = utils::nir_channel(frame.mat())?;
    let mut image = if opts.no_denoise {
        gray
    } else {
        let mut denoised = Mat::default();
        imgproc::bilateral_filter_def(&gray, &mut denoised, 9, 80., 80.)?;
        denoised
    };

    let mask = hand_mask(&image, opts.hand_threshold)?;
    let mut contour =
        largest_contour(&mask, opts.hand_min_area)?.ok_or(PalmError::NoHandFound)?;

    if contour.len() >= MIN_ELLIPSE_POINTS {
        let ellipse = imgproc::fit_ellipse(&contour)?;
        match tilt_correction(ellipse.angle, opts.max_tilt) {
            Some(rotation) => {
                debug!("手掌倾斜 {:.1}°，进行校正", rotation);
                let m = imgproc::get_rotation_matrix_2d(ellipse.center, rotation as f64, 1.0)?;
                image = warp(&image, &m, imgproc::INTER_CUBIC)?;
                let filled = fill_contour(&contour, mask.rows(), mask.cols())?;
                let rotated = warp(&filled, &m, imgproc::INTER_NEAREST)?;
                if let Some(c) = largest_contour(&rotated, 0.)? {
                    contour = c;
                }
            }
            None => debug!("椭圆角度 {:.1}° 超出校正范围，保持原方向", ellipse.angle),
        }
    }

    let hand = fill_contour(&contour, image.rows(), image.cols())?;
    let mut masked = Mat::default();
    core::bitwise_and(&image, &image, &mut masked, &hand)?;

    let rect = expand_rect(imgproc::bounding_rect(&contour)?, opts.roi_margin, masked.size()?);
    let cropped = Mat::roi(&masked, rect)?.try_clone()?;

    let mut roi = Mat::default();
    imgproc::resize(
        &cropped,
        &mut roi,
        Size::new(opts.roi_size, opts.roi_size),
        0.,
        0.,
        imgproc::INTER_LINEAR,
    )?;
    Ok(Roi::new(roi))
}

/// 根据椭圆主轴角度计算校正角度
///
/// OpenCV 给出的角度范围为 [0, 180)，大于 90° 时换算为负角度。
/// 只有倾斜幅度小于 `max_tilt` 时才校正，接近水平的拟合结果通常是误检。
pub fn tilt_correction(angle: f32, max_tilt: f32) -> Option<f32> {
    let rotation = if angle > 90. { angle - 180. } else { angle };
    (rotation.abs() < max_tilt).then_some(rotation)
}

/// 二值化并做开闭运算，去掉背景噪点
pub(super) fn hand_mask(image: &Mat, threshold: f64) -> Result<Mat> {
    let mut binary = Mat::default();
    imgproc::threshold(image, &mut binary, threshold, 255., imgproc::THRESH_BINARY)?;

    let kernel = imgproc::get_structuring_element_def(imgproc::MORPH_RECT, Size::new(5, 5))?;
    let mut opened = Mat::default();
    imgproc::morphology_ex_def(&binary, &mut opened, imgproc::MORPH_OPEN, &kernel)?;
    let mut closed = Mat::default();
    imgproc::morphology_ex_def(&opened, &mut closed, imgproc::MORPH_CLOSE, &kernel)?;
    Ok(closed)
}

/// 返回面积最大且不小于 `min_area` 的外轮廓
pub(super) fn largest_contour(mask: &Mat, min_area: f64) -> Result<Option<Vector<Point>>> {
    let mut contours = Vector::<Vector<Point>>::new();
    imgproc::find_contours_def(
        mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
    )?;

    let mut best: Option<(f64, Vector<Point>)> = None;
    for contour in contours {
        let area = imgproc::contour_area_def(&contour)?;
        if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
            best = Some((area, contour));
        }
    }

    Ok(best.and_then(|(area, contour)| {
        debug!("最大轮廓面积: {:.0}", area);
        (area >= min_area && !contour.is_empty()).then_some(contour)
    }))
}

fn fill_contour(contour: &Vector<Point>, rows: i32, cols: i32) -> Result<Mat> {
    let mut mask = Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC1, Scalar::all(0.))?;
    let mut polys = Vector::<Vector<Point>>::new();
    polys.push(contour.clone());
    imgproc::fill_poly_def(&mut mask, &polys, Scalar::all(255.))?;
    Ok(mask)
}

fn warp(image: &Mat, m: &Mat, flags: i32) -> Result<Mat> {
    let mut output = Mat::default();
    imgproc::warp_affine(
        image,
        &mut output,
        m,
        image.size()?,
        flags,
        core::BORDER_CONSTANT,
        Scalar::all(0.),
    )?;
    Ok(output)
}

/// 在外接矩形四周加上边距，并限制在图像范围内
fn expand_rect(rect: Rect, margin: i32, bounds: Size) -> Rect {
    let x0 = (rect.x - margin).max(0);
    let y0 = (rect.y - margin).max(0);
    let x1 = (rect.x + rect.width + margin).min(bounds.width);
    let y1 = (rect.y + rect.height + margin).min(bounds.height);
    Rect::new(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1))
}
