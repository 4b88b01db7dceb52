use log::debug;
use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;

use super::{Skeleton, VesselMap};
use crate::config::PipelineOptions;
use crate::error::Result;
use crate::utils;

/// 二值化并细化为单像素宽的骨架
pub fn segment(vessels: &VesselMap, opts: &PipelineOptions) -> Result<Skeleton> {
    let binary = binarize(vessels, opts)?;
    skeletonize(&binary, opts)
}

/// 自适应阈值二值化，去除小连通区域后做开闭运算平滑边界
pub fn binarize(vessels: &VesselMap, opts: &PipelineOptions) -> Result<Mat> {
    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(vessels.mat(), &mut blurred, Size::new(5, 5), 0.)?;

    // 窗口必须为大于 1 的奇数
    let block = (opts.adaptive_block.max(3)) | 1;
    let mut binary = Mat::default();
    imgproc::adaptive_threshold(
        &blurred,
        &mut binary,
        255.,
        imgproc::ADAPTIVE_THRESH_GAUSSIAN_C,
        imgproc::THRESH_BINARY,
        block,
        opts.adaptive_offset,
    )?;

    let cleaned = remove_small_objects(&binary, opts.min_object_area)?;
    let opened = morph(&cleaned, imgproc::MORPH_OPEN, 3)?;
    morph(&opened, imgproc::MORPH_CLOSE, 5)
}

/// 细化二值图像，可选去除外围像素
pub fn skeletonize(binary: &Mat, opts: &PipelineOptions) -> Result<Skeleton> {
    let (rows, cols) = (binary.rows(), binary.cols());
    let mut pixels: Vec<u8> =
        utils::pixels_u8(binary)?.into_iter().map(|p| (p > 0) as u8).collect();

    thin(&mut pixels, rows as usize, cols as usize);
    if opts.periphery {
        suppress_periphery(&mut pixels, rows as usize, cols as usize, opts.periphery_ratio);
    }

    let on = pixels.iter().filter(|&&p| p > 0).count();
    debug!("骨架像素数量: {}", on);
    pixels.iter_mut().for_each(|p| *p *= 255);
    Ok(Skeleton::new(utils::mat_from_u8(rows, cols, &pixels)?))
}

/// 去除面积小于 `min_area` 的 8 连通区域
pub fn remove_small_objects(binary: &Mat, min_area: i32) -> Result<Mat> {
    let mut labels = Mat::default();
    let mut stats = Mat::default();
    let mut centroids = Mat::default();
    let n = imgproc::connected_components_with_stats_def(
        binary,
        &mut labels,
        &mut stats,
        &mut centroids,
    )?;

    let mut keep = vec![false; n as usize];
    for label in 1..n {
        keep[label as usize] = *stats.at_2d::<i32>(label, imgproc::CC_STAT_AREA)? >= min_area;
    }

    let pixels: Vec<u8> = utils::pixels_i32(&labels)?
        .into_iter()
        .map(|l| if keep[l as usize] { 255 } else { 0 })
        .collect();
    utils::mat_from_u8(binary.rows(), binary.cols(), &pixels)
}

fn morph(src: &Mat, op: i32, size: i32) -> Result<Mat> {
    let kernel =
        imgproc::get_structuring_element_def(imgproc::MORPH_ELLIPSE, Size::new(size, size))?;
    let mut dst = Mat::default();
    imgproc::morphology_ex_def(src, &mut dst, op, &kernel)?;
    Ok(dst)
}

/// Zhang-Suen 细化，`pixels` 中前景为 1
///
/// 每轮分两个子迭代删除边界像素，删除条件保证不会断开骨架。
pub fn thin(pixels: &mut [u8], rows: usize, cols: usize) {
    if rows < 3 || cols < 3 {
        return;
    }
    let mut marked = Vec::new();
    loop {
        let mut changed = false;
        for step in 0..2 {
            marked.clear();
            for y in 1..rows - 1 {
                for x in 1..cols - 1 {
                    if pixels[y * cols + x] == 1 && deletable(pixels, cols, y, x, step) {
                        marked.push(y * cols + x);
                    }
                }
            }
            for &i in &marked {
                pixels[i] = 0;
            }
            changed |= !marked.is_empty();
        }
        if !changed {
            break;
        }
    }
    // 边框像素不参与迭代，直接清除
    for x in 0..cols {
        pixels[x] = 0;
        pixels[(rows - 1) * cols + x] = 0;
    }
    for y in 0..rows {
        pixels[y * cols] = 0;
        pixels[y * cols + cols - 1] = 0;
    }
}

fn deletable(pixels: &[u8], cols: usize, y: usize, x: usize, step: usize) -> bool {
    let at = |dy: isize, dx: isize| {
        pixels[(y as isize + dy) as usize * cols + (x as isize + dx) as usize]
    };
    // P2..P9，从正上方开始顺时针
    let p = [at(-1, 0), at(-1, 1), at(0, 1), at(1, 1), at(1, 0), at(1, -1), at(0, -1), at(-1, -1)];

    let neighbours: u8 = p.iter().sum();
    if !(2..=6).contains(&neighbours) {
        return false;
    }
    let transitions = (0..8).filter(|&i| p[i] == 0 && p[(i + 1) % 8] == 1).count();
    if transitions != 1 {
        return false;
    }
    let (p2, p4, p6, p8) = (p[0], p[2], p[4], p[6]);
    match step {
        0 => p2 * p4 * p6 == 0 && p4 * p6 * p8 == 0,
        _ => p2 * p4 * p8 == 0 && p2 * p6 * p8 == 0,
    }
}

/// 清除到图像中心距离不小于 `ratio` 倍最大距离的像素
pub fn suppress_periphery(pixels: &mut [u8], rows: usize, cols: usize, ratio: f64) {
    let (cy, cx) = (rows as f64 / 2., cols as f64 / 2.);
    let max_dist = (cy * cy + cx * cx).sqrt();
    let limit = ratio * max_dist;
    for y in 0..rows {
        for x in 0..cols {
            let d = ((y as f64 - cy).powi(2) + (x as f64 - cx).powi(2)).sqrt();
            if d >= limit {
                pixels[y * cols + x] = 0;
            }
        }
    }
}

/// 统计二值图中的连通区域数量（不含背景）
pub fn count_components(binary: &Mat) -> Result<i32> {
    let mut labels = Mat::default();
    let n = imgproc::connected_components_def(binary, &mut labels)?;
    Ok(n - 1)
}
