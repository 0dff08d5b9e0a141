use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::base64::url_encode;

/// JSON Web Key (JWK) 的公鑰表示，支援 RSA 與 EC 兩種格式。
///
/// 欄位宣告順序即為序列化順序，並且依照 RFC 7638 §3.3 的字典序排列
/// （RSA：`e,kty,n`；EC：`crv,kty,x,y`），thumbprint 的雜湊輸入因此可逐位元組重現。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Jwk {
    /// RSA 格式的 JWK。
    Rsa(RsaJwk),
    /// 橢圓曲線格式的 JWK。
    Ec(EcJwk),
}

/// RSA 公鑰參數（RFC 7518 §6.3.1）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub e: String,
    pub kty: String,
    pub n: String,
}

/// EC 公鑰參數（RFC 7518 §6.2.1），座標已補零至曲線長度。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    /// 由 RSA 的模數與公開指數（大端序、無符號）建立 JWK。
    pub fn rsa(n: &[u8], e: &[u8]) -> Self {
        Jwk::Rsa(RsaJwk {
            e: url_encode(e),
            kty: "RSA".to_string(),
            n: url_encode(n),
        })
    }

    /// 由曲線名稱與已補零的座標建立 JWK。
    pub fn ec(crv: &str, x: &[u8], y: &[u8]) -> Self {
        Jwk::Ec(EcJwk {
            crv: crv.to_string(),
            kty: "EC".to_string(),
            x: url_encode(x),
            y: url_encode(y),
        })
    }

    /// 將 JWK 序列化為不含空白的 JSON 字串，即 thumbprint 所雜湊的內容。
    pub fn to_acme_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 計算 RFC 7638 JWK thumbprint：SHA-256 後以 base64url 編碼。
    pub fn thumbprint(&self) -> Result<String, serde_json::Error> {
        let hash = sha256(self.to_acme_json()?.as_bytes());
        Ok(url_encode(hash))
    }
}
