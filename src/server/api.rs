use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use clap::ValueEnum;
use log::info;
use serde_json::{Value, json};
use tokio::task::block_in_place;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::cli::normalize_key;
use crate::config::EnrollOptions;
use crate::ledger::Ledger;
use crate::metrics;
use crate::store::{HandSide, IdentityProfile, IdentityRecord};
use crate::station::EncodedSource;
use crate::utils;
use crate::vein::Frame;

fn decode(file: &[u8]) -> Result<Frame> {
    Ok(Frame::new(utils::imdecode(file)?))
}

/// 识别一张手掌图片
#[utoipa::path(
    post,
    path = "/verify",
    request_body(content = VerifyForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "识别结果"),
        (status = 409, description = "终端正忙"),
        (status = 422, description = "未检测到手掌或静脉特征不足"),
    )
)]
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<VerifyRequest>,
) -> Result<Json<Value>> {
    state.check_token(&token)?;
    let start = Instant::now();
    let decision = block_in_place(|| -> Result<_> {
        let frame = decode(&data.file)?;
        Ok(state.station.verify_frame(&frame)?)
    })?;
    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": decision,
    })))
}

/// 识别并签到
#[utoipa::path(
    post,
    path = "/attend",
    request_body(content = SessionForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "识别与签到结果"),
        (status = 409, description = "终端正忙"),
    )
)]
pub async fn attend_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<SessionRequest>,
) -> Result<Json<Value>> {
    state.check_token(&token)?;
    let outcome = block_in_place(|| -> Result<_> {
        let frame = decode(&data.file)?;
        Ok(state.station.attend(&frame, &state.ledger, &data.session)?)
    })?;
    Ok(Json(json!(outcome)))
}

/// 识别并切换离场/返回状态
#[utoipa::path(
    post,
    path = "/away",
    request_body(content = SessionForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "识别与离场状态"),
        (status = 409, description = "终端正忙"),
    )
)]
pub async fn away_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<SessionRequest>,
) -> Result<Json<Value>> {
    state.check_token(&token)?;
    let outcome = block_in_place(|| -> Result<_> {
        let frame = decode(&data.file)?;
        Ok(state.station.away(&frame, &state.ledger, &data.session)?)
    })?;
    Ok(Json(json!(outcome)))
}

/// 撤销最近一次签到或离场状态变更
#[utoipa::path(
    post,
    path = "/undo",
    responses(
        (status = 200, body = UndoResponse),
    )
)]
pub async fn undo_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<UndoResponse>> {
    state.check_token(&token)?;
    let undone = block_in_place(|| state.ledger.undo())?;
    Ok(Json(UndoResponse { undone }))
}

/// 使用上传的多张图片登记新身份
#[utoipa::path(
    post,
    path = "/enroll",
    request_body(content = EnrollForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "登记成功的身份记录"),
        (status = 409, description = "身份已存在，或同一只手已登记为其他身份"),
        (status = 422, description = "可用样本不足"),
    )
)]
pub async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<EnrollRequest>,
) -> Result<Json<IdentityRecord>> {
    state.check_token(&token)?;
    let key = normalize_key(&data.key, &state.key_pattern)?;
    let side = match &data.side {
        Some(side) => {
            <HandSide as ValueEnum>::from_str(side, true).map_err(|e| anyhow::anyhow!(e))?
        }
        None => state.enroll.side,
    };
    let opts = EnrollOptions { side, ..state.enroll.clone() };
    let profile = IdentityProfile {
        key,
        name: data.name.clone(),
        faculty: data.faculty.clone(),
        program: data.program.clone(),
    };

    info!("收到登记请求 {}，共 {} 张图片", profile.key, data.file.len());
    let mut source = EncodedSource::new(data.file.iter().map(|file| file.to_vec()));
    let record = block_in_place(|| state.station.enroll(&mut source, profile, &opts))?;
    Ok(Json(record))
}

/// 列出已登记的身份
#[utoipa::path(
    get,
    path = "/identities",
    responses(
        (status = 200, description = "全部身份记录"),
    )
)]
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<Vec<IdentityRecord>>> {
    state.check_token(&token)?;
    Ok(Json(state.station.store().identities()?))
}

/// 删除身份及其全部模板
#[utoipa::path(
    delete,
    path = "/identities/{key}",
    params(("key" = String, Path, description = "身份键")),
    responses(
        (status = 200, description = "已删除"),
        (status = 404, description = "身份不存在"),
    )
)]
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Path(key): Path<String>,
) -> Result<()> {
    state.check_token(&token)?;
    let key = normalize_key(&key, &state.key_pattern)?;
    block_in_place(|| state.station.store().delete_identity(&key))?;
    Ok(())
}

/// 导出 prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text()?)
}
