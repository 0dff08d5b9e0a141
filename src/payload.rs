use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{base64::url_encode, jwk::Jwk, jws::Jws};

/// JWS 的 payload 內容。
///
/// `Empty` 代表 POST-as-GET：payload 欄位為空字串，而不是 `"null"` 或 `{}`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Json(Vec<u8>),
}

impl Payload {
    /// POST-as-GET 用的空 payload。
    pub fn post_as_get() -> Self {
        Payload::Empty
    }

    /// 序列化任意 claim set。序列化結果為 JSON `null` 時視同空 payload。
    pub fn from_claims<P: Serialize + ?Sized>(claims: &P) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(claims)?;
        if value.is_null() {
            return Ok(Payload::Empty);
        }
        Ok(Payload::Json(serde_json::to_vec(&value)?))
    }

    /// payload 的 base64url 表示；空 payload 為空字串。
    pub fn to_base64(&self) -> String {
        match self {
            Payload::Empty => String::new(),
            Payload::Json(bytes) => url_encode(bytes),
        }
    }
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
pub trait PayloadT: Serialize {
    /// 轉換為可簽名的 [`Payload`]。
    fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        Payload::from_claims(self)
    }

    /// 驗證載荷資料是否符合預期的規範，失敗時回傳原因。
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// 表示建立新帳號（或查詢既有帳號）所需的載荷資料。
#[derive(Debug, Clone, Serialize)]
pub struct NewAccountPayload {
    #[serde(rename = "termsOfServiceAgreed", skip_serializing_if = "Option::is_none")]
    terms_of_service_agreed: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contact: Vec<String>,
    #[serde(rename = "externalAccountBinding", skip_serializing_if = "Option::is_none")]
    external_account_binding: Option<Jws>,
    #[serde(rename = "onlyReturnExisting", skip_serializing_if = "Option::is_none")]
    only_return_existing: Option<bool>,
}

impl NewAccountPayload {
    /// 建立註冊載荷。沒有 URI scheme 的聯絡資訊會自動補上 `mailto:`。
    pub fn new(contacts: &[String], terms_of_service_agreed: bool) -> Self {
        let contact = contacts
            .iter()
            .map(|c| {
                if c.contains(':') {
                    c.clone()
                } else {
                    format!("mailto:{c}")
                }
            })
            .collect();

        Self {
            terms_of_service_agreed: Some(terms_of_service_agreed),
            contact,
            external_account_binding: None,
            only_return_existing: None,
        }
    }

    /// 只查詢既有帳號，CA 不會因此建立新帳號（RFC 8555 §7.3.1）。
    pub fn lookup() -> Self {
        Self {
            terms_of_service_agreed: None,
            contact: Vec::new(),
            external_account_binding: None,
            only_return_existing: Some(true),
        }
    }

    /// 附加 External Account Binding 的內層 JWS。
    pub fn external_account_binding(mut self, binding: Jws) -> Self {
        self.external_account_binding = Some(binding);
        self
    }

    pub fn contact(&self) -> &[String] {
        &self.contact
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), String> {
        if self.only_return_existing.is_none() && self.terms_of_service_agreed != Some(true) {
            return Err("Terms of service must be agreed".into());
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱或 IP 位址。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn new(type_: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            value: value.into(),
        }
    }

    /// DNS 名稱識別項。
    pub fn dns(value: impl Into<String>) -> Self {
        Self::new("dns", value)
    }

    /// IP 位址識別項（RFC 8738）。
    pub fn ip(addr: IpAddr) -> Self {
        Self::new("ip", addr.to_string())
    }
}

/// 表示建立新訂單時所需的載荷資料。
#[derive(Debug, Clone, Serialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(identifiers: &[Identifier]) -> Self {
        Self {
            identifiers: identifiers.to_vec(),
        }
    }
}

impl PayloadT for NewOrderPayload {
    /// 必須至少包含一個識別項，且類型與值皆不得為空。
    fn validate(&self) -> Result<(), String> {
        if self.identifiers.is_empty() {
            return Err("At least one identifier is required".into());
        }
        if let Some(bad) = self
            .identifiers
            .iter()
            .find(|i| i.type_.is_empty() || i.value.is_empty())
        {
            return Err(format!("Invalid identifier: {bad:?}"));
        }
        Ok(())
    }
}

/// 通知 CA 開始驗證挑戰的載荷，固定為 `{}`（RFC 8555 §7.5.1）。
#[derive(Debug, Clone, Serialize, Default)]
pub struct ChallengeResponsePayload {}

impl PayloadT for ChallengeResponsePayload {}

/// 表示最終化訂單時所需的載荷資料。
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOrderPayload {
    csr: String,
}

impl FinalizeOrderPayload {
    /// 由 DER 編碼的 CSR 建立。
    pub fn new(csr_der: &[u8]) -> Self {
        Self {
            csr: url_encode(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), String> {
        if self.csr.is_empty() {
            return Err("CSR must not be empty".into());
        }
        Ok(())
    }
}

/// 帳戶金鑰輪替的內層載荷（RFC 8555 §7.3.5）。
#[derive(Debug, Clone, Serialize)]
pub struct KeyChangePayload {
    pub account: String,
    #[serde(rename = "oldKey")]
    pub old_key: Jwk,
}

impl PayloadT for KeyChangePayload {}

/// 憑證撤銷載荷（RFC 8555 §7.6）。
#[derive(Debug, Clone, Serialize)]
pub struct RevocationPayload {
    certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

impl RevocationPayload {
    pub fn new(cert_der: &[u8], reason: Option<u8>) -> Self {
        Self {
            certificate: url_encode(cert_der),
            reason,
        }
    }
}

impl PayloadT for RevocationPayload {
    fn validate(&self) -> Result<(), String> {
        // RFC 5280 §5.3.1，7 未使用
        match self.reason {
            Some(reason) if reason == 7 || reason > 10 => {
                Err(format!("Invalid revocation reason: {reason}"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_null_claims_become_empty_payload() {
        assert_eq!(Payload::post_as_get().to_base64(), "");
        let none: Option<u32> = None;
        let payload = Payload::from_claims(&none).unwrap();
        assert_eq!(payload, Payload::Empty);
        assert_eq!(payload.to_base64(), "");
    }

    #[test]
    fn test_challenge_response_is_empty_object() {
        let payload = ChallengeResponsePayload::default().to_payload().unwrap();
        assert_eq!(payload, Payload::Json(b"{}".to_vec()));
    }

    #[test]
    fn test_new_account_payload_shape() {
        let payload = NewAccountPayload::new(&["a@example.com".to_string()], true);
        assert_eq!(payload.contact(), ["mailto:a@example.com"]);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"termsOfServiceAgreed":true,"contact":["mailto:a@example.com"]}"#
        );
        assert!(payload.validate().is_ok());
        assert!(NewAccountPayload::new(&[], false).validate().is_err());
    }

    #[test]
    fn test_lookup_payload_shape() {
        assert_eq!(
            serde_json::to_string(&NewAccountPayload::lookup()).unwrap(),
            r#"{"onlyReturnExisting":true}"#
        );
    }

    #[test]
    fn test_new_order_validation() {
        let ok = NewOrderPayload::new(&[Identifier::dns("example.com")]);
        assert!(ok.validate().is_ok());
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"identifiers":[{"type":"dns","value":"example.com"}]}"#
        );
        assert!(NewOrderPayload::new(&[]).validate().is_err());
        assert!(NewOrderPayload::new(&[Identifier::dns("")]).validate().is_err());
    }

    #[test]
    fn test_ip_identifier() {
        let id = Identifier::ip("192.0.2.1".parse().unwrap());
        assert_eq!(id.type_, "ip");
        assert_eq!(id.value, "192.0.2.1");
    }

    #[test]
    fn test_finalize_payload_encodes_der() {
        let payload = FinalizeOrderPayload::new(&[0x30, 0x82, 0xff]);
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"{"csr":"MIL_"}"#);
    }

    #[test]
    fn test_revocation_reason_validation() {
        assert!(RevocationPayload::new(&[1], Some(1)).validate().is_ok());
        assert!(RevocationPayload::new(&[1], Some(7)).validate().is_err());
        assert!(RevocationPayload::new(&[1], None).validate().is_ok());
    }
}
