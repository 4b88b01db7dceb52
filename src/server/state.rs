use std::sync::Arc;

use crate::config::EnrollOptions;
use crate::ledger::RosterLedger;
use crate::station::Station;

/// 应用状态
pub struct AppState {
    /// 识别终端
    pub station: Station,
    /// 签到名册
    pub ledger: RosterLedger,
    /// 登记参数
    pub enroll: EnrollOptions,
    /// 身份键格式
    pub key_pattern: String,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        station: Station,
        ledger: RosterLedger,
        enroll: EnrollOptions,
        key_pattern: String,
        token: String,
    ) -> Arc<Self> {
        Arc::new(AppState { station, ledger, enroll, key_pattern, token })
    }

    pub fn check_token(&self, token: &str) -> super::error::Result<()> {
        if token != self.token {
            return Err(super::error::Unauthorized.into());
        }
        Ok(())
    }
}
