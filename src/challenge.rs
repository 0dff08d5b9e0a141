//! 授權（Authorization）與挑戰（Challenge）物件，以及挑戰的選擇策略。

use std::fmt;

use chrono::{DateTime, Utc};
use openssl::hash::{hash, MessageDigest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    base64::url_encode,
    error::{Problem, Result},
    key_pair::KeyError,
    payload::Identifier,
};

/// 表示 ACME 挑戰的類型。未知的類型原樣保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for ChallengeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ChallengeType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ChallengeType> for String {
    fn from(t: ChallengeType) -> Self {
        match t {
            ChallengeType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 挑戰狀態（RFC 8555 §7.1.6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 授權狀態（RFC 8555 §7.1.6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// `pending` 與 `processing` 以外皆為終結狀態。
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub status: ChallengeStatus,
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_record: Vec<Value>,
}

impl Challenge {
    /// key authorization：`token + "." + thumbprint`（RFC 8555 §8.1）。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        format!("{}.{}", self.token, thumbprint)
    }

    /// dns-01 的 TXT 記錄值：key authorization 的 SHA-256，再以 base64url 編碼。
    pub fn dns_txt_value(&self, thumbprint: &str) -> Result<String> {
        let digest = hash(
            MessageDigest::sha256(),
            self.key_authorization(thumbprint).as_bytes(),
        )
        .map_err(KeyError::from)?;
        Ok(url_encode(&*digest))
    }

    /// http-01 回應所在的路徑。
    pub fn http_path(&self) -> String {
        format!("/.well-known/acme-challenge/{}", self.token)
    }
}

/// 表示單一識別項的授權物件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
    #[serde(skip)]
    url: String,
}

impl Authorization {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// dns-01 記錄名稱，萬用字元授權會去掉 `*.`。
    pub fn dns_record_name(&self) -> String {
        let domain = self
            .identifier
            .value
            .strip_prefix("*.")
            .unwrap_or(&self.identifier.value);
        format!("_acme-challenge.{domain}")
    }

    pub fn challenge(&self, challenge_type: &ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| &c.challenge_type == challenge_type)
    }
}

/// 為每個授權挑選挑戰，並在觸發驗證前佈署回應。
pub trait ChallengeStrategy: Send + Sync {
    /// 選出要觸發的挑戰；沒有可用的挑戰時回傳 `None`。
    fn select<'a>(&self, authorization: &'a Authorization) -> Option<&'a Challenge>;

    /// 佈署挑戰回應（HTTP 檔案、DNS TXT 記錄等），預設不做任何事。
    fn prepare(
        &self,
        _authorization: &Authorization,
        _challenge: &Challenge,
        _key_authorization: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// 依伺服器列出的順序，選擇第一個類型在支援清單中的挑戰。
#[derive(Debug, Clone)]
pub struct FirstSupported {
    supported: Vec<ChallengeType>,
}

impl FirstSupported {
    pub fn new<I, T>(supported: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ChallengeType>,
    {
        Self {
            supported: supported.into_iter().map(Into::into).collect(),
        }
    }

    pub fn supported(&self) -> &[ChallengeType] {
        &self.supported
    }
}

impl Default for FirstSupported {
    fn default() -> Self {
        Self::new([
            ChallengeType::Http01,
            ChallengeType::Dns01,
            ChallengeType::TlsAlpn01,
        ])
    }
}

impl ChallengeStrategy for FirstSupported {
    fn select<'a>(&self, authorization: &'a Authorization) -> Option<&'a Challenge> {
        authorization
            .challenges
            .iter()
            .find(|c| self.supported.contains(&c.challenge_type))
    }
}
