use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use log::{debug, info};

/// 发送给显示端的状态码
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Capturing,
    Processing,
    Matched(String),
    NoMatch,
    /// 没有检测到手掌或静脉特征不足，需要重新采集
    Retake,
    Busy,
    /// 手掌质量接近要求，保持不动
    HoldSteady,
    /// 手掌偏离中心或距离不合适
    Adjust,
    /// 距上次采集不足冷却时间，附带剩余秒数
    Wait(u64),
    Duplicate,
    /// 签到成功，附带座位号
    Seated(String),
    AlreadyMarked,
    NotFound,
    Out,
    Returned,
    Sample { collected: usize, required: usize },
    Registered,
    AlreadyRegistered,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::Capturing => f.write_str("CAPTURING"),
            Self::Processing => f.write_str("PROCESSING"),
            Self::Matched(key) => write!(f, "MATCHED:{}", key),
            Self::NoMatch => f.write_str("NO_MATCH"),
            Self::Retake => f.write_str("RETAKE"),
            Self::Busy => f.write_str("BUSY"),
            Self::HoldSteady => f.write_str("HOLD_STEADY"),
            Self::Adjust => f.write_str("ADJUST"),
            Self::Wait(secs) => write!(f, "WAIT:{}", secs),
            Self::Duplicate => f.write_str("DUPLICATE"),
            Self::Seated(table) => write!(f, "TABLE:{}", table),
            Self::AlreadyMarked => f.write_str("ALREADY_MARKED"),
            Self::NotFound => f.write_str("NOT_FOUND"),
            Self::Out => f.write_str("OUT"),
            Self::Returned => f.write_str("RETURNED"),
            Self::Sample { collected, required } => write!(f, "SAMPLE:{}/{}", collected, required),
            Self::Registered => f.write_str("REGISTERED"),
            Self::AlreadyRegistered => f.write_str("ALREADY_REG"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// 只写的状态通道，发送失败时直接忽略
pub trait Feedback: Send + Sync {
    fn send(&self, status: &Status);
}

/// 只写日志
pub struct LogFeedback;

impl Feedback for LogFeedback {
    fn send(&self, status: &Status) {
        info!("状态: {}", status);
    }
}

/// 每个状态写一行，例如串口屏幕或管道
pub struct LineFeedback<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LineFeedback<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> Feedback for LineFeedback<W> {
    fn send(&self, status: &Status) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        if let Err(e) = writeln!(writer, "{}", status).and_then(|_| writer.flush()) {
            debug!("状态 {} 发送失败: {}", status, e);
        }
    }
}

impl<F: Feedback + ?Sized> Feedback for Box<F> {
    fn send(&self, status: &Status) {
        (**self).send(status)
    }
}
