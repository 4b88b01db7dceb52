use std::io;

use thiserror::Error;

/// 掌静脉识别过程中的错误
#[derive(Error, Debug)]
pub enum PalmError {
    /// 采集端报告的错误，调用方会重试一次
    #[error("采集失败: {0}")]
    Capture(String),

    #[error("未检测到手掌")]
    NoHandFound,

    #[error("静脉特征不足，请重新采集")]
    InsufficientVeinData,

    #[error("身份 {0} 已登记")]
    DuplicateIdentity(String),

    #[error("该手掌已登记为 {existing}（相似度 {score:.3}）")]
    AlreadyEnrolledUnderDifferentIdentity { existing: String, score: f32 },

    #[error("身份 {0} 不存在")]
    IdentityNotFound(String),

    #[error("特征维度不一致: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("上一次识别尚未结束")]
    Busy,

    #[error("登记样本不足: {collected}/{required}")]
    EnrollmentIncomplete { collected: usize, required: usize },

    #[error("登记样本已满")]
    EnrollmentFull,

    #[error("存储错误: {0}")]
    StoreIo(String),

    #[error("OpenCV 错误: {0}")]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T, E = PalmError> = std::result::Result<T, E>;

impl From<io::Error> for PalmError {
    fn from(err: io::Error) -> Self {
        Self::StoreIo(err.to_string())
    }
}

impl From<heed::Error> for PalmError {
    fn from(err: heed::Error) -> Self {
        Self::StoreIo(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpyError> for PalmError {
    fn from(err: ndarray_npy::ReadNpyError) -> Self {
        Self::StoreIo(err.to_string())
    }
}

impl From<ndarray_npy::WriteNpyError> for PalmError {
    fn from(err: ndarray_npy::WriteNpyError) -> Self {
        Self::StoreIo(err.to_string())
    }
}

impl PalmError {
    /// 是否属于单次采集的失败，可以提示用户重新采集
    pub fn is_retake(&self) -> bool {
        matches!(self, Self::NoHandFound | Self::InsufficientVeinData | Self::Capture(_))
    }
}
