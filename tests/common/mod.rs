#![allow(dead_code)]

use std::path::{Path, PathBuf};

use opencv::core::{self, Mat, Point, Scalar, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;
use palmvein::vein::Frame;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const WIDTH: i32 = 640;
pub const HEIGHT: i32 = 480;

/// 绘制一只合成手掌：亮色椭圆上的若干条暗色静脉
///
/// 相同 `seed` 得到相同的静脉走向，`shift` 平移整只手。
pub fn hand(seed: u64, shift: (i32, i32)) -> Mat {
    tilted_hand(seed, shift, 0.)
}

/// 手掌椭圆主轴旋转 `angle` 度
pub fn tilted_hand(seed: u64, shift: (i32, i32), angle: f64) -> Mat {
    let mut img = blank();
    let (dx, dy) = shift;
    let center = Point::new(WIDTH / 2 + dx, HEIGHT / 2 + dy);
    imgproc::ellipse(
        &mut img,
        center,
        Size::new(150, 200),
        angle,
        0.,
        360.,
        Scalar::all(170.),
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )
    .unwrap();
    draw_veins(&mut img, center, seed);
    img
}

/// 轴对齐的矩形手掌，外轮廓只有 4 个顶点
pub fn square_hand(seed: u64) -> Mat {
    let mut img = blank();
    let center = Point::new(WIDTH / 2, HEIGHT / 2);
    let rect = core::Rect::new(center.x - 150, center.y - 200, 300, 400);
    imgproc::rectangle(&mut img, rect, Scalar::all(170.), imgproc::FILLED, imgproc::LINE_8, 0)
        .unwrap();
    draw_veins(&mut img, center, seed);
    img
}

fn draw_veins(img: &mut Mat, center: Point, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..6 {
        let from = Point::new(
            center.x + rng.random_range(-100..100),
            center.y + rng.random_range(-150..150),
        );
        let to = Point::new(
            center.x + rng.random_range(-100..100),
            center.y + rng.random_range(-150..150),
        );
        imgproc::line(img, from, to, Scalar::all(100.), 6, imgproc::LINE_8, 0).unwrap();
    }
}

pub fn hand_frame(seed: u64, shift: (i32, i32)) -> Frame {
    Frame::new(hand(seed, shift))
}

pub fn blank() -> Mat {
    Mat::new_rows_cols_with_default(HEIGHT, WIDTH, core::CV_8UC3, Scalar::all(0.)).unwrap()
}

pub fn write_image<P: AsRef<Path>>(dir: P, name: &str, img: &Mat) -> PathBuf {
    let path = dir.as_ref().join(name);
    assert!(imgcodecs::imwrite_def(path.to_str().unwrap(), img).unwrap());
    path
}

/// 写入同一只手的 `n` 张平移样本
pub fn write_samples<P: AsRef<Path>>(dir: P, seed: u64, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let shift = (i as i32 * 3, -(i as i32) * 2);
            write_image(&dir, &format!("hand{}_{}.png", seed, i), &hand(seed, shift))
        })
        .collect()
}

pub fn encode_png(img: &Mat) -> Vec<u8> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode_def(".png", img, &mut buf).unwrap();
    buf.to_vec()
}
