use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, ProtocolError, Result},
    transport::Transport,
};

/// ACME 目錄物件（RFC 8555 §7.1.1），列出 CA 各項操作的端點。
///
/// 欄位皆為可選，缺少的端點在使用時才以 `ConfigError` 回報。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_authz: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revoke_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_change: Option<String>,
    /// ACME Renewal Information 端點，可能不存在。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renewal_info: Option<String>,
    #[serde(default)]
    pub meta: DirectoryMeta,
}

/// 目錄的 `meta` 欄位。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

fn endpoint<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| AcmeError::Config(format!("Directory has no {name} endpoint")))
}

impl Directory {
    /// 以一次 GET 取得目錄。
    ///
    /// # 錯誤
    ///
    /// 非 2xx 或內容不是合法的目錄 JSON 時回傳 `ProtocolError`。
    pub fn fetch<T: Transport + ?Sized>(transport: &T, url: &str) -> Result<Self> {
        let response = transport.get(url)?.error_for_status()?;
        let directory = serde_json::from_slice::<Directory>(response.body()).map_err(|e| {
            ProtocolError::local("malformed", format!("Invalid directory at {url}: {e}"))
        })?;
        debug!("Loaded ACME directory from {url}");
        Ok(directory)
    }

    pub fn new_nonce(&self) -> Result<&str> {
        endpoint(&self.new_nonce, "newNonce")
    }

    pub fn new_account(&self) -> Result<&str> {
        endpoint(&self.new_account, "newAccount")
    }

    pub fn new_order(&self) -> Result<&str> {
        endpoint(&self.new_order, "newOrder")
    }

    pub fn new_authz(&self) -> Option<&str> {
        self.new_authz.as_deref()
    }

    pub fn revoke_cert(&self) -> Result<&str> {
        endpoint(&self.revoke_cert, "revokeCert")
    }

    pub fn key_change(&self) -> Result<&str> {
        endpoint(&self.key_change, "keyChange")
    }

    pub fn renewal_info(&self) -> Option<&str> {
        self.renewal_info.as_deref()
    }

    pub fn external_account_required(&self) -> bool {
        self.meta.external_account_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{reply, reply_text, MockTransport};
    use serde_json::json;

    #[test]
    fn test_fetch_directory() -> Result<()> {
        let transport = MockTransport::default();
        transport.on(
            "GET",
            "https://ca/dir",
            reply(
                200,
                json!({
                    "newNonce": "https://ca/nonce",
                    "newAccount": "https://ca/acct",
                    "newOrder": "https://ca/order",
                    "revokeCert": "https://ca/revoke",
                    "keyChange": "https://ca/key-change",
                    "meta": {
                        "termsOfService": "https://ca/tos.pdf",
                        "caaIdentities": ["ca.example"],
                        "externalAccountRequired": true
                    }
                }),
            ),
        );

        let directory = Directory::fetch(&transport, "https://ca/dir")?;
        assert_eq!(directory.new_nonce()?, "https://ca/nonce");
        assert_eq!(directory.new_order()?, "https://ca/order");
        assert_eq!(directory.key_change()?, "https://ca/key-change");
        assert_eq!(directory.meta.caa_identities, ["ca.example"]);
        assert!(directory.external_account_required());
        assert_eq!(directory.renewal_info(), None);
        Ok(())
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let directory: Directory =
            serde_json::from_value(json!({"newNonce": "https://ca/nonce"})).unwrap();
        assert!(!directory.external_account_required());
        assert!(matches!(directory.new_account(), Err(AcmeError::Config(_))));
    }

    #[test]
    fn test_malformed_or_failed_fetch_is_protocol_error() {
        let transport = MockTransport::default();
        transport.on("GET", "https://ca/broken", reply_text(200, "not json"));
        transport.on("GET", "https://ca/down", reply_text(503, "unavailable"));

        assert!(matches!(
            Directory::fetch(&transport, "https://ca/broken"),
            Err(AcmeError::Protocol(_))
        ));
        assert!(matches!(
            Directory::fetch(&transport, "https://ca/down"),
            Err(AcmeError::Protocol(e)) if e.http_status == Some(503)
        ));
    }
}
