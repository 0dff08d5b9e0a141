//! JSON Web Signature (RFC 7515) 的 flattened JSON 序列化與 ACME 所需的各種簽名模式。

use serde::{Deserialize, Serialize};

use crate::{
    account::ExternalAccountBinding,
    error::Result,
    jwk::Jwk,
    key_pair::{HmacKey, KeyPair},
    payload::{KeyChangePayload, Payload, PayloadT},
    protection::ProtectedHeader,
    signature::{create_signature, JwsSigner},
};

/// 表示一個 JSON Web Signature (JWS) 物件，各部分皆為 base64url（無填充）字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位。
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// 以指定的保護頭與 payload 簽名。
    pub fn sign(header: &ProtectedHeader, payload: &Payload, signer: &dyn JwsSigner) -> Result<Self> {
        let header = header.to_base64()?;
        let payload = payload.to_base64();
        let signature = create_signature(&header, &payload, signer)?;
        Ok(Jws {
            header,
            payload,
            signature,
        })
    }

    pub fn protected(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// 將 `Jws` 序列化為 JSON 字串，即送往 CA 的請求本文。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 嵌入公鑰 JWK 的簽名模式，用於帳戶取得 key-id 之前的請求（new-account）。
pub fn sign_with_jwk(payload: &Payload, key: &KeyPair, nonce: &str, url: &str) -> Result<Jws> {
    let header = ProtectedHeader::with_jwk(key.algorithm(), key.public_jwk()?, Some(nonce), url);
    Jws::sign(&header, payload, key)
}

/// 以 key-id（帳戶 URL）識別的簽名模式，用於帳戶註冊後的所有請求。
pub fn sign_with_kid(
    payload: &Payload,
    key: &KeyPair,
    nonce: &str,
    url: &str,
    key_id: &str,
) -> Result<Jws> {
    let header = ProtectedHeader::with_kid(key.algorithm(), key_id, Some(nonce), url);
    Jws::sign(&header, payload, key)
}

/// External Account Binding 的內層 JWS（RFC 8555 §7.3.4）。
///
/// payload 是帳戶公鑰 JWK，以 CA 發放的 HMAC 金鑰簽名，`kid` 為 EAB key-id，不帶 nonce。
pub fn sign_external_binding(
    binding: &ExternalAccountBinding,
    account_jwk: &Jwk,
    url: &str,
) -> Result<Jws> {
    let hmac = HmacKey::from_base64url(binding.hmac_key())?;
    let header = ProtectedHeader::with_kid(hmac.algorithm(), binding.key_id(), None, url);
    Jws::sign(&header, &Payload::from_claims(account_jwk)?, &hmac)
}

/// 帳戶金鑰輪替的內層 JWS（RFC 8555 §7.3.5），由新金鑰簽名且不帶 nonce。
pub fn sign_key_change(
    new_key: &KeyPair,
    account_url: &str,
    old_jwk: Jwk,
    url: &str,
) -> Result<Jws> {
    let payload = KeyChangePayload {
        account: account_url.to_string(),
        old_key: old_jwk,
    }
    .to_payload()?;
    let header = ProtectedHeader::with_jwk(new_key.algorithm(), new_key.public_jwk()?, None, url);
    Jws::sign(&header, &payload, new_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base64::{url_decode, url_encode},
        key_pair::Curve,
    };
    use serde_json::{json, Value};

    fn decode_json(part: &str) -> Value {
        serde_json::from_slice(&url_decode(part).unwrap()).unwrap()
    }

    fn verify(jws: &Jws, key: &KeyPair) -> bool {
        let input = format!("{}.{}", jws.protected(), jws.payload());
        key.verify(input.as_bytes(), &url_decode(jws.signature()).unwrap())
            .unwrap()
    }

    #[test]
    fn test_embedded_jwk_header() -> Result<()> {
        let key = KeyPair::generate_ec(Curve::P256)?;
        let payload = Payload::from_claims(&json!({"termsOfServiceAgreed": true}))?;
        let jws = sign_with_jwk(&payload, &key, "nonce-1", "https://ca/acct")?;

        let header = decode_json(jws.protected());
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["url"], "https://ca/acct");
        assert_eq!(header["jwk"], serde_json::to_value(key.public_jwk()?)?);
        assert!(header.get("kid").is_none());
        assert!(verify(&jws, &key));
        Ok(())
    }

    #[test]
    fn test_kid_post_as_get_has_empty_payload() -> Result<()> {
        let key = KeyPair::generate()?;
        let jws = sign_with_kid(
            &Payload::post_as_get(),
            &key,
            "nonce-2",
            "https://ca/authz/9",
            "https://ca/acct/1",
        )?;

        assert_eq!(jws.payload(), "");
        let json = jws.to_json()?;
        assert!(json.contains(r#""payload":"""#));
        assert!(!json.contains("null"));

        let header = decode_json(jws.protected());
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["kid"], "https://ca/acct/1");
        assert!(header.get("jwk").is_none());
        assert!(verify(&jws, &key));
        Ok(())
    }

    #[test]
    fn test_repeated_signatures_verify_with_same_header() -> Result<()> {
        let key = KeyPair::generate_ec(Curve::P384)?;
        let payload = Payload::from_claims(&json!({"identifiers": []}))?;
        let a = sign_with_kid(&payload, &key, "n", "https://ca/order", "kid")?;
        let b = sign_with_kid(&payload, &key, "n", "https://ca/order", "kid")?;

        assert_eq!(a.protected(), b.protected());
        assert!(verify(&a, &key));
        assert!(verify(&b, &key));
        Ok(())
    }

    #[test]
    fn test_external_binding() -> Result<()> {
        let secret = b"an eab secret of reasonable size";
        let binding = ExternalAccountBinding::new("kid-1", url_encode(secret));
        let account_key = KeyPair::generate_ec(Curve::P256)?;
        let jwk = account_key.public_jwk()?;
        let jws = sign_external_binding(&binding, &jwk, "https://ca/acct")?;

        let header = decode_json(jws.protected());
        assert_eq!(header, json!({"alg": "HS256", "kid": "kid-1", "url": "https://ca/acct"}));
        assert_eq!(decode_json(jws.payload()), serde_json::to_value(&jwk)?);

        let expected = HmacKey::from_base64url(&url_encode(secret))?
            .sign(format!("{}.{}", jws.protected(), jws.payload()).as_bytes())?;
        assert_eq!(url_decode(jws.signature()).unwrap(), expected);
        Ok(())
    }

    #[test]
    fn test_key_change_inner_jws() -> Result<()> {
        let old_key = KeyPair::generate()?;
        let new_key = KeyPair::generate_ec(Curve::P256)?;
        let jws = sign_key_change(
            &new_key,
            "https://ca/acct/1",
            old_key.public_jwk()?,
            "https://ca/key-change",
        )?;

        let header = decode_json(jws.protected());
        assert!(header.get("nonce").is_none());
        assert_eq!(header["jwk"], serde_json::to_value(new_key.public_jwk()?)?);
        let payload = decode_json(jws.payload());
        assert_eq!(payload["account"], "https://ca/acct/1");
        assert_eq!(payload["oldKey"], serde_json::to_value(old_key.public_jwk()?)?);
        assert!(verify(&jws, &new_key));
        Ok(())
    }
}
