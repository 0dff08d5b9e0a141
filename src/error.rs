use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    certificate::CertificateError, csr::CsrError, key_pair::KeyError, payload::Identifier,
    storage::StorageError,
};

const ACME_ERROR_NS: &str = "urn:ietf:params:acme:error:";

/// 本庫所有 ACME 操作共用的錯誤類型。
#[derive(Debug, Error)]
pub enum AcmeError {
    /// 金鑰不支援或簽名失敗，不會重試。
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    /// CA 拒絕請求，或回應違反協議。
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// 前置條件不成立，例如缺少必要的 EAB 或目錄欄位。
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request header error: {0}")]
    Header(#[from] reqwest::header::ToStrError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

impl AcmeError {
    /// 是否為 CA 回報的 `badNonce`。
    pub fn is_bad_nonce(&self) -> bool {
        matches!(self, AcmeError::Protocol(e) if e.is_bad_nonce())
    }

    /// 若為協議錯誤，取得其內容。
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            AcmeError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AcmeError>;

/// RFC 7807 problem document，ACME 以此回報錯誤（RFC 8555 §6.7）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Problem>,
}

/// CA 拒絕請求或回應不符協議時的錯誤，保留原始 problem 內容。
///
/// 本地偵測到的協議違規（例如在訂單尚未 `valid` 時下載憑證）
/// 同樣以此表示，此時 `http_status` 為 `None`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub http_status: Option<u16>,
    pub problem: Problem,
}

impl ProtocolError {
    /// 由錯誤回應解析。內容不是 problem document 時，以回應本文作為 detail。
    pub fn from_response(http_status: u16, body: &[u8]) -> Self {
        let problem = match serde_json::from_slice::<Problem>(body) {
            Ok(problem) if !problem.problem_type.is_empty() => problem,
            _ => Problem {
                detail: String::from_utf8_lossy(body).trim().to_string(),
                ..Problem::default()
            },
        };
        Self {
            http_status: Some(http_status),
            problem,
        }
    }

    /// 本地偵測到的協議違規，`kind` 為 ACME 錯誤類型的短名稱（如 `orderNotReady`）。
    pub fn local(kind: &str, detail: impl Into<String>) -> Self {
        Self {
            http_status: None,
            problem: Problem {
                problem_type: format!("{ACME_ERROR_NS}{kind}"),
                detail: detail.into(),
                ..Problem::default()
            },
        }
    }

    pub fn problem_type(&self) -> &str {
        &self.problem.problem_type
    }

    pub fn detail(&self) -> &str {
        &self.problem.detail
    }

    /// ACME 命名空間內的短名稱，例如 `rateLimited`。
    pub fn kind(&self) -> Option<&str> {
        self.problem.problem_type.strip_prefix(ACME_ERROR_NS)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == Some("badNonce")
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.problem.problem_type.is_empty() {
            "unknown"
        } else {
            self.problem.problem_type.as_str()
        };
        write!(f, "{kind}: {}", self.problem.detail)?;
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {status})")?;
        }
        for sub in &self.problem.subproblems {
            write!(f, "; {}: {}", sub.problem_type, sub.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_document_is_preserved() {
        let body = br#"{
            "type": "urn:ietf:params:acme:error:rejectedIdentifier",
            "detail": "Error creating new order :: Cannot issue for \"bad.example\"",
            "status": 400,
            "subproblems": [{
                "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                "detail": "bad.example is forbidden",
                "identifier": {"type": "dns", "value": "bad.example"}
            }]
        }"#;
        let err = ProtocolError::from_response(400, body);

        assert_eq!(err.kind(), Some("rejectedIdentifier"));
        assert_eq!(
            err.detail(),
            "Error creating new order :: Cannot issue for \"bad.example\""
        );
        assert_eq!(err.http_status, Some(400));
        assert_eq!(
            err.problem.subproblems[0].identifier,
            Some(Identifier::dns("bad.example"))
        );
        assert!(err.to_string().contains("bad.example is forbidden"));
    }

    #[test]
    fn test_non_problem_body_becomes_detail() {
        let err = ProtocolError::from_response(502, b"<html>Bad Gateway</html>\n");
        assert_eq!(err.problem_type(), "");
        assert_eq!(err.detail(), "<html>Bad Gateway</html>");
        assert!(!err.is_bad_nonce());
    }

    #[test]
    fn test_bad_nonce_detection() {
        let err: AcmeError = ProtocolError::from_response(
            400,
            br#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has an invalid anti-replay nonce"}"#,
        )
        .into();
        assert!(err.is_bad_nonce());
        assert!(!AcmeError::Cancelled.is_bad_nonce());
    }

    #[test]
    fn test_local_error_has_no_status() {
        let err = ProtocolError::local("orderNotReady", "order is pending");
        assert_eq!(err.http_status, None);
        assert_eq!(err.problem_type(), "urn:ietf:params:acme:error:orderNotReady");
    }
}
