use std::fmt;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Problem, ProtocolError, Result},
    payload::Identifier,
};

/// 訂單狀態（RFC 8555 §7.1.6）。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    /// `valid` 與 `invalid` 為終結狀態。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Processing => 2,
            Self::Valid | Self::Invalid => 3,
        }
    }

    /// 狀態只能前進：終結狀態不再改變，`invalid` 可由任何非終結狀態到達。
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == Self::Invalid || next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示一筆 ACME 訂單。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    /// 各識別項授權物件的 URL。
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    /// 訂單 `valid` 後才會出現的憑證 URL。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    #[serde(skip)]
    url: String,
}

impl Order {
    /// 訂單 URL，取自建立訂單時的 `Location` 標頭。
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// 以 CA 回傳的最新內容更新訂單。
    ///
    /// # 錯誤
    ///
    /// 狀態倒退（例如 `invalid` 變成 `valid`）時回傳 `ProtocolError`，訂單保持不變。
    pub fn update_from(&mut self, latest: Order) -> Result<()> {
        if !self.status.can_transition_to(latest.status) {
            warn!(
                "Order {} reported status {} after {}",
                self.url, latest.status, self.status
            );
            return Err(ProtocolError::local(
                "malformed",
                format!(
                    "Order {} cannot move from {} to {}",
                    self.url, self.status, latest.status
                ),
            )
            .into());
        }

        let url = std::mem::take(&mut self.url);
        *self = latest;
        if self.url.is_empty() {
            self.url = url;
        }
        Ok(())
    }
}
