//! 采集前的手掌质量评估
//!
//! 对连续画面中的手掌打分（满分 100），分数足够高且距上次采集超过冷却时间时才采集：
//!
//! - 面积：手掌占画面 15%~45% 得 35 分，10%~50% 得 20 分
//! - 居中：外接矩形中心越靠近画面中心越高，最多 35 分
//! - 稳定：最近 10 帧中心位置的方差小于 100 得 30 分，小于 300 得 15 分

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;
use opencv::core::{Mat, Rect, Size};
use opencv::imgproc;
use opencv::prelude::*;

use super::{Frame, roi};
use crate::config::{PipelineOptions, QualityOptions};
use crate::error::Result;
use crate::utils;

/// 参与稳定性计算的帧数
pub const STABILITY_WINDOW: usize = 10;
/// 至少积累这么多帧才计算稳定性
const MIN_STABLE_FRAMES: usize = 5;
/// 低于采集分数但高于此值时提示保持不动
const HOLD_STEADY_SCORE: f32 = 60.;

/// 手掌占画面比例的得分
pub fn area_score(ratio: f64) -> f64 {
    if 0.15 < ratio && ratio < 0.45 {
        35.
    } else if 0.10 < ratio && ratio < 0.50 {
        20.
    } else {
        0.
    }
}

/// 手掌中心到画面中心的距离越小得分越高
pub fn centre_score(hand: Rect, frame: Size) -> f64 {
    let (cx, cy) = rect_centre(hand);
    let (w, h) = (frame.width as f64 / 2., frame.height as f64 / 2.);
    let dist = (cx - w).hypot(cy - h);
    let max = w.hypot(h);
    if max == 0. { 0. } else { (1. - dist / max).max(0.) * 35. }
}

/// 中心位置的方差，两个坐标轴分别计算后取平均
pub fn stability_score(centres: &VecDeque<(f64, f64)>) -> f64 {
    if centres.len() < MIN_STABLE_FRAMES {
        return 0.;
    }
    let n = centres.len() as f64;
    let (mx, my) = centres.iter().fold((0., 0.), |(x, y), c| (x + c.0, y + c.1));
    let (mx, my) = (mx / n, my / n);
    let (vx, vy) = centres
        .iter()
        .fold((0., 0.), |(x, y), c| (x + (c.0 - mx).powi(2), y + (c.1 - my).powi(2)));
    let variance = (vx / n + vy / n) / 2.;
    match variance {
        v if v < 100. => 30.,
        v if v < 300. => 15.,
        _ => 0.,
    }
}

fn rect_centre(rect: Rect) -> (f64, f64) {
    (rect.x as f64 + rect.width as f64 / 2., rect.y as f64 + rect.height as f64 / 2.)
}

/// 单帧的评估结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub score: f32,
    /// 手掌的外接矩形，未检测到手掌时为 `None`
    pub hand: Option<Rect>,
}

/// 记录最近若干帧的手掌位置并给当前帧打分
pub struct HandQuality {
    threshold: f64,
    min_area: f64,
    centres: VecDeque<(f64, f64)>,
}

impl HandQuality {
    pub fn new(opts: &PipelineOptions) -> Self {
        Self {
            threshold: opts.hand_threshold,
            min_area: opts.hand_min_area,
            centres: VecDeque::with_capacity(STABILITY_WINDOW),
        }
    }

    pub fn assess(&mut self, frame: &Frame) -> Result<QualityReport> {
        let gray = utils::nir_channel(frame.mat())?;
        let mut blurred = Mat::default();
        imgproc::gaussian_blur_def(&gray, &mut blurred, Size::new(21, 21), 0.)?;
        let mask = roi::hand_mask(&blurred, self.threshold)?;

        let Some(contour) = roi::largest_contour(&mask, self.min_area)? else {
            return Ok(QualityReport { score: 0., hand: None });
        };
        let area = imgproc::contour_area_def(&contour)?;
        let rect = imgproc::bounding_rect(&contour)?;
        let size = gray.size()?;

        if self.centres.len() == STABILITY_WINDOW {
            self.centres.pop_front();
        }
        self.centres.push_back(rect_centre(rect));

        let ratio = area / (size.width as f64 * size.height as f64);
        let score = area_score(ratio) + centre_score(rect, size) + stability_score(&self.centres);
        Ok(QualityReport { score: score.min(100.) as f32, hand: Some(rect) })
    }

    /// 清空位置记录，例如换了一个人
    pub fn reset(&mut self) {
        self.centres.clear();
    }
}

/// 一帧画面是否可以采集
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Capture(f32),
    /// 分数足够，但距上次采集不足冷却时间
    Cooldown(Duration),
    HoldSteady(f32),
    Adjust(f32),
    NoHand,
}

/// 自动采集门限：质量分数加冷却时间
pub struct CaptureGate {
    quality: HandQuality,
    min_score: f32,
    cooldown: Duration,
    last_capture: Option<Instant>,
}

impl CaptureGate {
    pub fn new(opts: &QualityOptions, pipeline: &PipelineOptions) -> Self {
        Self {
            quality: HandQuality::new(pipeline),
            min_score: opts.capture_score,
            cooldown: Duration::try_from_secs_f64(opts.capture_cooldown).unwrap_or_default(),
            last_capture: None,
        }
    }

    /// 评估一帧，允许采集时记录 `now` 作为本次采集时间
    pub fn admit(&mut self, frame: &Frame, now: Instant) -> Result<Admission> {
        let report = self.quality.assess(frame)?;
        debug!("手掌质量: {:.0}", report.score);
        if report.hand.is_none() {
            return Ok(Admission::NoHand);
        }
        if report.score < self.min_score {
            return Ok(if report.score >= HOLD_STEADY_SCORE {
                Admission::HoldSteady(report.score)
            } else {
                Admission::Adjust(report.score)
            });
        }

        if let Some(last) = self.last_capture {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.cooldown {
                return Ok(Admission::Cooldown(self.cooldown - elapsed));
            }
        }
        self.last_capture = Some(now);
        Ok(Admission::Capture(report.score))
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{self, Point, Scalar};

    use super::*;

    fn frame_with_hand(center: Point, axes: Size) -> Frame {
        let mut img =
            Mat::new_rows_cols_with_default(480, 640, core::CV_8UC1, Scalar::all(0.)).unwrap();
        imgproc::ellipse(
            &mut img,
            center,
            axes,
            0.,
            0.,
            360.,
            Scalar::all(170.),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        Frame::new(img)
    }

    fn centred() -> Frame {
        frame_with_hand(Point::new(320, 240), Size::new(150, 200))
    }

    #[test]
    fn test_area_score_bands() {
        assert_eq!(area_score(0.30), 35.);
        assert_eq!(area_score(0.12), 20.);
        assert_eq!(area_score(0.48), 20.);
        assert_eq!(area_score(0.05), 0.);
        assert_eq!(area_score(0.60), 0.);
    }

    #[test]
    fn test_centre_score() {
        let frame = Size::new(640, 480);
        assert_eq!(centre_score(Rect::new(220, 140, 200, 200), frame), 35.);
        assert!(centre_score(Rect::new(0, 0, 100, 100), frame) < 15.);
    }

    #[test]
    fn test_stability_needs_history() {
        let mut centres: VecDeque<_> = std::iter::repeat_n((320., 240.), 4).collect();
        assert_eq!(stability_score(&centres), 0.);
        centres.push_back((320., 240.));
        assert_eq!(stability_score(&centres), 30.);

        let jitter: VecDeque<_> = (0..10).map(|i| (300. + (i % 2) as f64 * 30., 240.)).collect();
        assert_eq!(stability_score(&jitter), 15.);
        let moving: VecDeque<_> = (0..10).map(|i| (i as f64 * 40., 240.)).collect();
        assert_eq!(stability_score(&moving), 0.);
    }

    #[test]
    fn test_steady_hand_reaches_full_score() {
        let mut quality = HandQuality::new(&PipelineOptions::default());
        let frame = centred();
        for _ in 0..MIN_STABLE_FRAMES - 1 {
            let report = quality.assess(&frame).unwrap();
            assert!((report.score - 70.).abs() < 1.);
        }
        assert!((quality.assess(&frame).unwrap().score - 100.).abs() < 1.);

        quality.reset();
        assert!(quality.assess(&frame).unwrap().score < 85.);
    }

    #[test]
    fn test_small_or_missing_hand() {
        let mut quality = HandQuality::new(&PipelineOptions::default());
        let tiny = frame_with_hand(Point::new(320, 240), Size::new(30, 30));
        assert_eq!(quality.assess(&tiny).unwrap(), QualityReport { score: 0., hand: None });

        let small = frame_with_hand(Point::new(320, 240), Size::new(80, 100));
        assert!(quality.assess(&small).unwrap().score < 40.);
    }

    #[test]
    fn test_gate_cooldown() {
        let opts = QualityOptions::default();
        let mut gate = CaptureGate::new(&opts, &PipelineOptions::default());
        let frame = centred();
        let start = Instant::now();

        for _ in 0..MIN_STABLE_FRAMES - 1 {
            assert!(matches!(gate.admit(&frame, start).unwrap(), Admission::HoldSteady(_)));
        }
        assert!(matches!(gate.admit(&frame, start).unwrap(), Admission::Capture(_)));

        match gate.admit(&frame, start + Duration::from_secs(1)).unwrap() {
            Admission::Cooldown(remaining) => assert_eq!(remaining, Duration::from_secs(2)),
            other => panic!("unexpected: {:?}", other),
        }
        let later = start + Duration::from_millis(3100);
        assert!(matches!(gate.admit(&frame, later).unwrap(), Admission::Capture(_)));

        let blank = frame_with_hand(Point::new(320, 240), Size::new(0, 0));
        assert_eq!(gate.admit(&blank, later).unwrap(), Admission::NoHand);
    }
}
