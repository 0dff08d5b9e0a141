use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    x509::X509,
};
use thiserror::Error;

use crate::{error::AcmeError, key_pair::KeyPair, storage::Storage};

const CHAIN_FILE: &str = "fullchain.pem";
const KEY_FILE: &str = "private.pem";

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    Parse(#[from] openssl::error::ErrorStack),
    #[error("No certificate in PEM data")]
    Empty,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// 從 CA 下載的 PEM 憑證鏈，第一張為終端憑證。
#[derive(Debug, Clone)]
pub struct CertificateChain {
    pem: String,
    certs: Vec<X509>,
}

impl CertificateChain {
    /// 解析 PEM 憑證鏈。
    ///
    /// # 錯誤
    ///
    /// 格式錯誤回傳 `CertificateError::Parse`；沒有任何憑證回傳 `CertificateError::Empty`。
    pub fn from_pem(pem: &str) -> Result<Self> {
        let certs = X509::stack_from_pem(pem.as_bytes())?;
        if certs.is_empty() {
            return Err(CertificateError::Empty);
        }
        Ok(Self {
            pem: pem.to_string(),
            certs,
        })
    }

    /// 原始 PEM 文字，未經改寫。
    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn leaf(&self) -> &X509 {
        &self.certs[0]
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    /// 終端憑證的 DER 編碼，撤銷時使用。
    pub fn leaf_der(&self) -> Result<Vec<u8>> {
        Ok(self.leaf().to_der()?)
    }

    /// 終端憑證的到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        to_datetime(self.leaf().not_after())
    }

    /// 剩餘有效期少於 `threshold_days` 天（或已過期）時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        self.should_renew_at(threshold_days, Utc::now())
    }

    /// 將憑證鏈寫入 `<name>/fullchain.pem`，`name` 通常為憑證的第一個識別項。
    pub fn save(&self, storage: &dyn Storage, name: &str) -> crate::Result<()> {
        storage.write_file(&format!("{name}/{CHAIN_FILE}"), self.pem.as_bytes())?;
        info!("Saved certificate chain as {name}");
        Ok(())
    }

    /// 讀回 [`CertificateChain::save`] 寫入的憑證鏈。
    ///
    /// # 錯誤
    ///
    /// 檔案不存在回傳 `StorageError::NotFound`；內容無法解析回傳 `CertificateError`。
    pub fn load(storage: &dyn Storage, name: &str) -> crate::Result<Self> {
        let pem = storage.read_file(&format!("{name}/{CHAIN_FILE}"))?;
        Ok(Self::from_pem(&String::from_utf8_lossy(&pem))?)
    }

    fn should_renew_at(&self, threshold_days: u32, now: DateTime<Utc>) -> Result<bool> {
        let remaining = self.not_after()? - now;
        debug!(
            "Certificate expires in {}h, renewal threshold {threshold_days}d",
            remaining.num_hours()
        );
        Ok(remaining < Duration::days(i64::from(threshold_days)))
    }
}

/// 將憑證金鑰寫入 `<name>/private.pem`，與憑證鏈放在同一目錄。
///
/// # 錯誤
///
/// 私鑰編碼或儲存寫入失敗時回傳錯誤。
pub fn save_certificate_key(storage: &dyn Storage, name: &str, key: &KeyPair) -> crate::Result<()> {
    storage.write_file(&format!("{name}/{KEY_FILE}"), key.to_pem()?.as_bytes())?;
    Ok(())
}

/// 讀回憑證金鑰，續約時可沿用同一把金鑰。
pub fn load_certificate_key(storage: &dyn Storage, name: &str) -> crate::Result<KeyPair> {
    let pem = storage.read_file(&format!("{name}/{KEY_FILE}"))?;
    KeyPair::from_pem(&pem).map_err(AcmeError::from)
}

fn to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or(CertificateError::InvalidTimestamp)
}
