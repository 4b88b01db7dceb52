use std::io::{Read, Write};
use std::path::Path;

use indicatif::ProgressStyle;
use opencv::core::{self, Mat, Scalar, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;

use crate::error::{PalmError, Result};

/// 读取图片，统一解码为 BGR 三通道
pub fn imread<P: AsRef<Path>>(path: P) -> Result<Mat> {
    let path = path.as_ref();
    let img = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(PalmError::Capture(format!("无法读取图片: {}", path.display())));
    }
    Ok(img)
}

/// 从内存解码图片
pub fn imdecode(bytes: &[u8]) -> Result<Mat> {
    let buf = Vector::<u8>::from_slice(bytes);
    let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(PalmError::Capture("无法解码图片".to_string()));
    }
    Ok(img)
}

pub fn imwrite<P: AsRef<Path>>(path: P, img: &Mat) -> Result<()> {
    let path = path.as_ref();
    let flags = Vector::<i32>::new();
    if !imgcodecs::imwrite(&path.to_string_lossy(), img, &flags)? {
        return Err(PalmError::StoreIo(format!("无法写入图片: {}", path.display())));
    }
    Ok(())
}

/// 取出近红外成像所用的单通道
///
/// 彩色图像取 R 通道（BGR 中下标为 2），灰度图像原样复制
pub fn nir_channel(frame: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    match frame.channels() {
        1 => frame.copy_to(&mut gray)?,
        _ => core::extract_channel(frame, &mut gray, 2)?,
    }
    Ok(gray)
}

/// 使用 u8 像素构造单通道图像
pub fn mat_from_u8(rows: i32, cols: i32, data: &[u8]) -> Result<Mat> {
    assert_eq!(data.len(), (rows * cols) as usize, "pixel count mismatch");
    let mut mat = Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC1, Scalar::all(0.))?;
    mat.data_typed_mut::<u8>()?.copy_from_slice(data);
    Ok(mat)
}

/// 使用 f32 像素构造单通道图像
pub fn mat_from_f32(rows: i32, cols: i32, data: &[f32]) -> Result<Mat> {
    assert_eq!(data.len(), (rows * cols) as usize, "pixel count mismatch");
    let mut mat = Mat::new_rows_cols_with_default(rows, cols, core::CV_32FC1, Scalar::all(0.))?;
    mat.data_typed_mut::<f32>()?.copy_from_slice(data);
    Ok(mat)
}

/// 复制出单通道 u8 图像的所有像素（行优先）
pub fn pixels_u8(mat: &Mat) -> Result<Vec<u8>> {
    if mat.is_continuous() {
        return Ok(mat.data_typed::<u8>()?.to_vec());
    }
    let owned = mat.try_clone()?;
    Ok(owned.data_typed::<u8>()?.to_vec())
}

/// 复制出单通道 f32 图像的所有像素（行优先）
pub fn pixels_f32(mat: &Mat) -> Result<Vec<f32>> {
    if mat.is_continuous() {
        return Ok(mat.data_typed::<f32>()?.to_vec());
    }
    let owned = mat.try_clone()?;
    Ok(owned.data_typed::<f32>()?.to_vec())
}

/// 复制出连通区域标记图的所有标签
pub fn pixels_i32(mat: &Mat) -> Result<Vec<i32>> {
    if mat.is_continuous() {
        return Ok(mat.data_typed::<i32>()?.to_vec());
    }
    let owned = mat.try_clone()?;
    Ok(owned.data_typed::<i32>()?.to_vec())
}

/// 线性拉伸到 0~255 并转为 8 位，输入为常数时结果全为 0
pub fn stretch_to_u8(src: &Mat) -> Result<Mat> {
    let mut dst = Mat::default();
    core::normalize(src, &mut dst, 0., 255., core::NORM_MINMAX, core::CV_8U, &Mat::default())?;
    Ok(dst)
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold.dim} {wide_bar:.cyan/blue} {pos}/{len} {msg}")
        .expect("invalid progress template")
        .progress_chars("#>-")
}

pub fn read_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let v = std::io::stdin()
        .bytes()
        .take_while(|c| c.as_ref().ok() != Some(&b'\n'))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf8(v)?.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretch_to_u8() {
        let mat = mat_from_f32(1, 3, &[-2., 0., 2.]).unwrap();
        assert_eq!(pixels_u8(&stretch_to_u8(&mat).unwrap()).unwrap(), vec![0, 128, 255]);

        let flat = mat_from_f32(1, 3, &[3., 3., 3.]).unwrap();
        assert_eq!(pixels_u8(&stretch_to_u8(&flat).unwrap()).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_mat_roundtrip() {
        let data: Vec<u8> = (0..12).collect();
        let mat = mat_from_u8(3, 4, &data).unwrap();
        assert_eq!(mat.rows(), 3);
        assert_eq!(mat.cols(), 4);
        assert_eq!(pixels_u8(&mat).unwrap(), data);
    }
}
