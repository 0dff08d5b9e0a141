use crate::{
    base64::url_encode,
    key_pair::{HmacKey, KeyError, KeyPair},
};

/// 定義 JWS 簽名演算法的介面。
///
/// 帳戶金鑰（RSA / ECDSA）與 EAB 的 HMAC 金鑰都透過此介面簽名，
/// 因此 protected header 的 `alg` 與實際簽名方式只有一個來源。
pub trait JwsSigner {
    /// 寫入 protected header 的 `alg` 值。
    fn algorithm(&self) -> &'static str;

    /// 對簽名輸入進行簽名，回傳原始簽名位元組。
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError>;
}

impl JwsSigner for KeyPair {
    fn algorithm(&self) -> &'static str {
        KeyPair::algorithm(self)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        KeyPair::sign(self, data)
    }
}

impl JwsSigner for HmacKey {
    fn algorithm(&self) -> &'static str {
        HmacKey::algorithm(self)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        HmacKey::sign(self, data)
    }
}

/// 組合 JWS 簽名輸入 `header_b64 + "." + payload_b64`。
pub fn signing_input(header_b64: &str, payload_b64: &str) -> String {
    format!("{header_b64}.{payload_b64}")
}

/// 根據已編碼的 header 與 payload 產生 base64url 編碼的簽名。
pub fn create_signature(
    header_b64: &str,
    payload_b64: &str,
    signer: &dyn JwsSigner,
) -> Result<String, KeyError> {
    let input = signing_input(header_b64, payload_b64);
    let signature = signer.sign(input.as_bytes())?;
    Ok(url_encode(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base64::url_decode;

    #[test]
    fn test_signature_covers_header_and_payload() -> Result<(), KeyError> {
        let key = KeyPair::generate()?;
        let signature = create_signature("aGVhZGVy", "", &key)?;
        let raw = url_decode(&signature).unwrap();

        assert!(key.verify(b"aGVhZGVy.", &raw)?);
        assert!(!key.verify(b"aGVhZGVy", &raw)?);
        Ok(())
    }

    #[test]
    fn test_signer_algorithm_tags() -> Result<(), KeyError> {
        let hmac = HmacKey::from_base64url("c2VjcmV0")?;
        let ec = KeyPair::generate_ec(crate::key_pair::Curve::P256)?;
        let signers: [&dyn JwsSigner; 2] = [&hmac, &ec];
        let tags: Vec<_> = signers.iter().map(|s| s.algorithm()).collect();
        assert_eq!(tags, ["HS256", "ES256"]);
        Ok(())
    }
}
