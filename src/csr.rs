use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::{key_pair::KeyPair, payload::Identifier};

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
    #[error("Unsupported identifier type: {0}")]
    UnsupportedIdentifier(String),
}

type Result<T> = std::result::Result<T, CsrError>;

/// CSR 建構器：`dns` 識別項成為 DNS SAN，`ip` 識別項成為 IP SAN。
///
/// 第一個 DNS 名稱同時作為 subject 的 CN。
#[derive(Debug, Clone, Default)]
pub struct Csr {
    identifiers: Vec<Identifier>,
}

impl Csr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_identifiers(identifiers: &[Identifier]) -> Self {
        Self {
            identifiers: identifiers.to_vec(),
        }
    }

    /// 新增一個識別項。
    pub fn identifier(mut self, identifier: Identifier) -> Self {
        self.identifiers.push(identifier);
        self
    }

    /// 以 `key_pair` 簽署 CSR（SHA-256），回傳 DER 編碼。
    ///
    /// # 錯誤
    ///
    /// * 沒有任何識別項時回傳 `CsrError::NoSanEntries`。
    /// * 識別項類型不是 `dns` 或 `ip` 時回傳 `CsrError::UnsupportedIdentifier`。
    pub fn build(&self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        if self.identifiers.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let mut req_builder = X509Req::builder()?;

        if let Some(cn) = self.identifiers.iter().find(|i| i.type_ == "dns") {
            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_text("CN", &cn.value)?;
            req_builder.set_subject_name(&name.build())?;
        }

        let mut san_builder = SubjectAlternativeName::new();
        for identifier in &self.identifiers {
            match identifier.type_.as_str() {
                "dns" => san_builder.dns(&identifier.value),
                "ip" => san_builder.ip(&identifier.value),
                other => return Err(CsrError::UnsupportedIdentifier(other.to_string())),
            };
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(key_pair.pkey())?;
        req_builder.sign(key_pair.pkey(), MessageDigest::sha256())?;

        Ok(req_builder.build().to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::Curve;

    #[test]
    fn test_csr_with_dns_and_ip() {
        let key = KeyPair::generate_ec(Curve::P256).unwrap();
        let der = Csr::new()
            .identifier(Identifier::dns("example.com"))
            .identifier(Identifier::ip("192.0.2.7".parse().unwrap()))
            .build(&key)
            .unwrap();

        let req = X509Req::from_der(&der).unwrap();
        assert!(req.verify(key.pkey()).unwrap());
        let text = String::from_utf8(req.to_text().unwrap()).unwrap();
        assert!(text.contains("DNS:example.com"));
        assert!(text.contains("IP Address:192.0.2.7"));
        assert!(text.contains("CN = example.com") || text.contains("CN=example.com"));
    }

    #[test]
    fn test_csr_requires_identifiers() {
        let key = KeyPair::generate_ec(Curve::P256).unwrap();
        assert!(matches!(Csr::new().build(&key), Err(CsrError::NoSanEntries)));
    }

    #[test]
    fn test_csr_rejects_unknown_identifier_type() {
        let key = KeyPair::generate_ec(Curve::P256).unwrap();
        let csr = Csr::from_identifiers(&[Identifier::new("email", "a@example.com")]);
        assert!(matches!(csr.build(&key), Err(CsrError::UnsupportedIdentifier(t)) if t == "email"));
    }
}
