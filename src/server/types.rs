use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::Serialize;
use utoipa::ToSchema;

/// 识别请求
#[derive(TryFromMultipart)]
pub struct VerifyRequest {
    pub file: Bytes,
}

/// 识别表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct VerifyForm {
    /// 手掌图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 签到或离场请求
#[derive(TryFromMultipart)]
pub struct SessionRequest {
    pub session: String,
    pub file: Bytes,
}

/// 签到或离场表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SessionForm {
    /// 场次名称
    pub session: String,
    /// 手掌图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 登记请求
#[derive(TryFromMultipart)]
pub struct EnrollRequest {
    pub key: String,
    pub name: String,
    pub faculty: Option<String>,
    pub program: Option<String>,
    pub side: Option<String>,
    pub file: Vec<Bytes>,
}

/// 登记表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct EnrollForm {
    /// 身份键，例如学号
    pub key: String,
    /// 姓名
    pub name: String,
    /// 学院
    pub faculty: Option<String>,
    /// 专业
    pub program: Option<String>,
    /// 手掌侧别，Left 或 Right
    pub side: Option<String>,
    /// 样本图片，可以是多张
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 撤销响应
#[derive(Debug, Serialize, ToSchema)]
pub struct UndoResponse {
    /// 是否有状态被撤销
    pub undone: bool,
}
