use serde::Serialize;

use crate::{base64::url_encode, jwk::Jwk};

/// 表示 JWS 保護頭部（protected header）的資料結構。
///
/// 欄位依字典序宣告（`alg, jwk, kid, nonce, url`），`jwk` 與 `kid` 互斥。
/// EAB 與 key change 的內層 JWS 不帶 `nonce`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 嵌入的公鑰，僅用於尚未取得 key-id 的請求
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    /// 帳戶 URL（key-id）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// 用於防止重放攻擊的隨機數
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// 請求目標 URL
    pub url: String,
}

impl ProtectedHeader {
    /// 嵌入 JWK 的保護頭，用於 new-account 等尚無 key-id 的請求。
    pub fn with_jwk(alg: &str, jwk: Jwk, nonce: Option<&str>, url: &str) -> Self {
        Self {
            alg: alg.to_string(),
            jwk: Some(jwk),
            kid: None,
            nonce: nonce.map(str::to_string),
            url: url.to_string(),
        }
    }

    /// 以 key-id 識別帳戶的保護頭。
    pub fn with_kid(alg: &str, kid: &str, nonce: Option<&str>, url: &str) -> Self {
        Self {
            alg: alg.to_string(),
            jwk: None,
            kid: Some(kid.to_string()),
            nonce: nonce.map(str::to_string),
            url: url.to_string(),
        }
    }

    /// 序列化後以 base64url 編碼。
    pub fn to_base64(&self) -> Result<String, serde_json::Error> {
        Ok(url_encode(serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_header_serialization() {
        let jwk = Jwk::ec("P-256", &[0; 32], &[0; 32]);
        let header = ProtectedHeader::with_jwk("ES256", jwk, Some("n1"), "https://ca/acct");
        let json = serde_json::to_string(&header).unwrap();

        assert!(json.starts_with(r#"{"alg":"ES256","jwk":{"crv":"P-256""#));
        assert!(json.ends_with(r#""nonce":"n1","url":"https://ca/acct"}"#));
        assert!(!json.contains("kid"));
    }

    #[test]
    fn test_kid_header_serialization() {
        let header = ProtectedHeader::with_kid("RS256", "https://ca/acct/1", Some("n2"), "https://ca/order");
        assert_eq!(
            serde_json::to_string(&header).unwrap(),
            r#"{"alg":"RS256","kid":"https://ca/acct/1","nonce":"n2","url":"https://ca/order"}"#
        );
    }

    #[test]
    fn test_nonce_is_omitted_when_absent() {
        let header = ProtectedHeader::with_kid("HS256", "eab-kid", None, "https://ca/acct");
        assert!(!serde_json::to_string(&header).unwrap().contains("nonce"));
    }
}
