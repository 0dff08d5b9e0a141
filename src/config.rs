use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    account::ExternalAccountBinding,
    error::{AcmeError, Result},
    poll::{millis, PollPolicy},
};

/// Let's Encrypt 正式環境的目錄 URL。
pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄 URL。
pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ACME 會話的設定，於建立會話時明確傳入。
///
/// 所有欄位皆有預設值；JSON 中的時間長度以毫秒表示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub directory_url: String,
    pub terms_of_service_agreed: bool,
    /// CA 要求時才需要提供。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_binding: Option<ExternalAccountBinding>,
    /// 套用在每一個 HTTP 請求上的逾時。
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub poll: PollPolicy,
    /// 同時輪詢授權的最大執行緒數。
    pub workers: usize,
    /// 可接受的挑戰類型，依偏好排列。
    pub challenge_types: Vec<String>,
    /// 憑證剩餘天數低於此值時視為需要續約。
    pub renew_before_days: u32,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            directory_url: LETS_ENCRYPT_DIRECTORY.to_string(),
            terms_of_service_agreed: true,
            external_account_binding: None,
            request_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
            workers: 4,
            challenge_types: vec![
                "http-01".to_string(),
                "dns-01".to_string(),
                "tls-alpn-01".to_string(),
            ],
            renew_before_days: 30,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionConfig {
    /// 從 JSON 文字載入設定，未列出的欄位使用預設值。
    ///
    /// # 錯誤
    ///
    /// JSON 格式錯誤或設定值不合法時回傳錯誤。
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 檢查設定值是否可用。
    pub fn validate(&self) -> Result<()> {
        if self.directory_url.is_empty() {
            return Err(AcmeError::Config("directory_url must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(AcmeError::Config("workers must be at least 1".into()));
        }
        if self.challenge_types.is_empty() {
            return Err(AcmeError::Config(
                "challenge_types must list at least one type".into(),
            ));
        }
        if let Some(eab) = &self.external_account_binding {
            if eab.key_id().is_empty() || eab.hmac_key().is_empty() {
                return Err(AcmeError::Config(
                    "eab_kid and eab_hmac_key must both be set".into(),
                ));
            }
        }
        Ok(())
    }
}
