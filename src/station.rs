use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use crate::config::{EnrollOptions, MatchOptions, QualityOptions};
use crate::enroll::EnrollmentSession;
use crate::error::{PalmError, Result};
use crate::feedback::{Feedback, Status};
use crate::ledger::{Attendance, Ledger, Presence, attendance_id};
use crate::matcher::MatchDecision;
use crate::metrics;
use crate::store::{IdentityProfile, IdentityRecord, TemplateStore};
use crate::utils;
use crate::vein::{Admission, CaptureGate, Frame, Pipeline};

/// 图像采集端
pub trait FrameSource: Send {
    fn capture_frame(&mut self) -> Result<Frame>;
}

/// 依次读取一组图片文件
pub struct FileSource {
    paths: VecDeque<PathBuf>,
}

impl FileSource {
    pub fn new<I: IntoIterator<Item = PathBuf>>(paths: I) -> Self {
        Self { paths: paths.into_iter().collect() }
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for FileSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let path = self.paths.pop_front().ok_or_else(|| PalmError::Capture("没有更多图片".to_string()))?;
        debug!("读取图片 {}", path.display());
        Ok(Frame::new(utils::imread(&path)?))
    }
}

/// 依次解码一组已编码的图片，例如 HTTP 上传的文件
pub struct EncodedSource {
    images: VecDeque<Vec<u8>>,
}

impl EncodedSource {
    pub fn new<I: IntoIterator<Item = Vec<u8>>>(images: I) -> Self {
        Self { images: images.into_iter().collect() }
    }
}

impl FrameSource for EncodedSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let bytes = self
            .images
            .pop_front()
            .ok_or_else(|| PalmError::Capture("没有更多图片".to_string()))?;
        Ok(Frame::new(utils::imdecode(&bytes)?))
    }
}

/// 采集失败时重试一次
fn capture_with_retry(source: &mut dyn FrameSource) -> Result<Frame> {
    match source.capture_frame() {
        Err(PalmError::Capture(reason)) => {
            warn!("采集失败，重试一次: {}", reason);
            source.capture_frame()
        }
        other => other,
    }
}

/// 同一时刻只允许一次识别，释放时自动清除标记
struct AttemptGuard<'a>(&'a AtomicBool);

impl<'a> AttemptGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PalmError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 识别并签到的结果
#[derive(Debug, Clone, Serialize)]
pub struct AttendOutcome {
    pub decision: MatchDecision,
    pub attendance: Option<Attendance>,
}

/// 识别并切换离场状态的结果
#[derive(Debug, Clone, Serialize)]
pub struct AwayOutcome {
    pub decision: MatchDecision,
    pub presence: Option<Presence>,
}

/// 一个识别终端：一个采集端、一条流水线与一个模板库视图
pub struct Station {
    pipeline: Pipeline,
    store: Arc<TemplateStore>,
    match_opts: MatchOptions,
    feedback: Box<dyn Feedback>,
    /// 启用后从采集端读取的画面需要通过质量评估才会被使用
    gate: Option<Mutex<CaptureGate>>,
    in_flight: AtomicBool,
}

impl Station {
    pub fn new(pipeline: Pipeline, store: Arc<TemplateStore>, match_opts: MatchOptions) -> Self {
        Self {
            pipeline,
            store,
            match_opts,
            feedback: Box::new(crate::feedback::LogFeedback),
            gate: None,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_feedback(mut self, feedback: Box<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    /// 按 `opts.quality_gate` 决定是否启用采集质量门限
    pub fn with_quality(mut self, opts: &QualityOptions) -> Self {
        self.gate = opts
            .quality_gate
            .then(|| Mutex::new(CaptureGate::new(opts, self.pipeline.options())));
        self
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// 采集一帧并识别
    pub fn verify(&self, source: &mut dyn FrameSource) -> Result<MatchDecision> {
        let _guard = self.begin("verify")?;
        self.feedback.send(&Status::Capturing);
        let frame = self.capture(source, "verify")?;
        self.identify(&frame, "verify")
    }

    /// 识别已有的图像
    pub fn verify_frame(&self, frame: &Frame) -> Result<MatchDecision> {
        let _guard = self.begin("verify")?;
        self.identify(frame, "verify")
    }

    /// 识别后签到
    pub fn attend(
        &self,
        frame: &Frame,
        ledger: &dyn Ledger,
        session: &str,
    ) -> Result<AttendOutcome> {
        let _guard = self.begin("attend")?;
        let decision = self.identify(frame, "attend")?;
        let Some(key) = decision.identity() else {
            return Ok(AttendOutcome { decision, attendance: None });
        };

        let attendance = ledger.mark_present(key, session)?;
        self.feedback.send(&match &attendance {
            Attendance::Seated { table } => Status::Seated(table.clone()),
            Attendance::AlreadyMarked => Status::AlreadyMarked,
            Attendance::NotFound => Status::NotFound,
        });
        Ok(AttendOutcome { decision, attendance: Some(attendance) })
    }

    /// 识别后切换离场/返回状态
    pub fn away(&self, frame: &Frame, ledger: &dyn Ledger, session: &str) -> Result<AwayOutcome> {
        let _guard = self.begin("away")?;
        let decision = self.identify(frame, "away")?;
        let Some(key) = decision.identity() else {
            return Ok(AwayOutcome { decision, presence: None });
        };

        let presence = ledger.toggle_away(&attendance_id(session, key))?;
        self.feedback.send(&match presence {
            Presence::Out => Status::Out,
            Presence::Returned => Status::Returned,
        });
        Ok(AwayOutcome { decision, presence: Some(presence) })
    }

    /// 从采集端连续采集直到满足样本数量，然后登记
    ///
    /// 手掌检测失败或特征不足的图像会被跳过；重复身份与采集端错误会终止登记。
    pub fn enroll(
        &self,
        source: &mut dyn FrameSource,
        profile: IdentityProfile,
        opts: &EnrollOptions,
    ) -> Result<IdentityRecord> {
        let _guard = self.begin("enroll")?;
        let session = EnrollmentSession::begin(&self.store, profile, opts, &self.match_opts);
        let mut session = match session {
            Ok(session) => session,
            Err(e) => return Err(self.enroll_failed(e)),
        };

        while !session.is_complete() {
            self.feedback.send(&Status::Capturing);
            let frame = match self.capture(source, "enroll") {
                Ok(frame) => frame,
                Err(e) => {
                    session.abort();
                    return Err(self.enroll_failed(e));
                }
            };

            self.feedback.send(&Status::Processing);
            let vector = match self.pipeline.extract(&frame) {
                Ok(vector) => vector,
                Err(e) if e.is_retake() => {
                    debug!("样本不可用: {}", e);
                    self.feedback.send(&Status::Retake);
                    continue;
                }
                Err(e) => {
                    session.abort();
                    return Err(self.enroll_failed(e));
                }
            };

            match session.add_sample(vector, Some(frame.into_mat())) {
                Ok(collected) => {
                    self.feedback.send(&Status::Sample { collected, required: session.required() })
                }
                Err(e) => {
                    session.abort();
                    return Err(self.enroll_failed(e));
                }
            }
        }

        match session.commit() {
            Ok(record) => {
                metrics::inc_attempt("enroll", "registered");
                self.feedback.send(&Status::Registered);
                Ok(record)
            }
            Err(e) => Err(self.enroll_failed(e)),
        }
    }

    /// 通知显示端终端空闲
    pub fn ready(&self) {
        self.feedback.send(&Status::Idle);
    }

    fn begin(&self, mode: &str) -> Result<AttemptGuard<'_>> {
        AttemptGuard::acquire(&self.in_flight).inspect_err(|_| {
            metrics::inc_attempt(mode, "busy");
            self.feedback.send(&Status::Busy);
        })
    }

    fn enroll_failed(&self, err: PalmError) -> PalmError {
        let (status, outcome) = match &err {
            PalmError::DuplicateIdentity(_) => (Status::AlreadyRegistered, "duplicate_identity"),
            PalmError::AlreadyEnrolledUnderDifferentIdentity { .. } => {
                (Status::Duplicate, "duplicate_hand")
            }
            PalmError::Capture(_) => (Status::Error, "capture_failed"),
            _ => (Status::Error, "failed"),
        };
        metrics::inc_attempt("enroll", outcome);
        self.feedback.send(&status);
        err
    }

    fn capture(&self, source: &mut dyn FrameSource, mode: &str) -> Result<Frame> {
        let result = match &self.gate {
            Some(gate) => self.capture_gated(source, gate),
            None => capture_with_retry(source),
        };
        match result {
            Ok(frame) => {
                debug!("{}: CAPTURED", mode);
                Ok(frame)
            }
            Err(e) => {
                metrics::inc_attempt(mode, "capture_failed");
                self.feedback.send(&Status::Error);
                Err(e)
            }
        }
    }

    /// 持续读取画面直到某一帧通过质量门限，提示只在变化时发送
    fn capture_gated(
        &self,
        source: &mut dyn FrameSource,
        gate: &Mutex<CaptureGate>,
    ) -> Result<Frame> {
        let mut gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut last = None;
        loop {
            let frame = capture_with_retry(source)?;
            let status = match gate.admit(&frame, Instant::now())? {
                Admission::Capture(score) => {
                    debug!("质量 {:.0}，采集", score);
                    return Ok(frame);
                }
                Admission::Cooldown(remaining) => {
                    Status::Wait(remaining.as_secs_f64().ceil() as u64)
                }
                Admission::HoldSteady(_) => Status::HoldSteady,
                Admission::Adjust(_) => Status::Adjust,
                Admission::NoHand => Status::Retake,
            };
            if last.as_ref() != Some(&status) {
                self.feedback.send(&status);
                last = Some(status);
            }
        }
    }

    /// 提取特征并匹配，调用方负责持有识别标记
    fn identify(&self, frame: &Frame, mode: &str) -> Result<MatchDecision> {
        self.feedback.send(&Status::Processing);
        let vector = match self.pipeline.extract(frame) {
            Ok(vector) => vector,
            Err(e) => {
                debug!("{}: EXTRACTION_FAILED ({})", mode, e);
                metrics::inc_attempt(mode, "extraction_failed");
                self.feedback.send(if e.is_retake() { &Status::Retake } else { &Status::Error });
                return Err(e);
            }
        };
        debug!("{}: FEATURES_EXTRACTED", mode);

        let decision = self.store.match_query(&vector, &self.match_opts)?;
        metrics::observe_match_score(mode, decision.score);
        match decision.identity() {
            Some(key) => {
                debug!("{}: MATCHED {}", mode, key);
                metrics::inc_attempt(mode, "matched");
                self.feedback.send(&Status::Matched(key.to_string()));
            }
            None => {
                debug!("{}: NOT_MATCHED", mode);
                metrics::inc_attempt(mode, "not_matched");
                self.feedback.send(&Status::NoMatch);
            }
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        failures: usize,
    }

    impl FrameSource for Flaky {
        fn capture_frame(&mut self) -> Result<Frame> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(PalmError::Capture("timeout".into()));
            }
            Ok(Frame::new(opencv::core::Mat::default()))
        }
    }

    #[test]
    fn test_capture_retries_once() {
        assert!(capture_with_retry(&mut Flaky { failures: 1 }).is_ok());
        let result = capture_with_retry(&mut Flaky { failures: 2 });
        assert!(matches!(result, Err(PalmError::Capture(_))));
    }

    #[test]
    fn test_attempt_guard_serializes() {
        let flag = AtomicBool::new(false);
        let guard = AttemptGuard::acquire(&flag).unwrap();
        assert!(matches!(AttemptGuard::acquire(&flag), Err(PalmError::Busy)));
        drop(guard);
        assert!(AttemptGuard::acquire(&flag).is_ok());
    }
}
