//! ACME 帳戶模型、External Account Binding 與帳戶的持久化。

use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, Result},
    key_pair::KeyPair,
    storage::Storage,
};

/// CA 發放的 External Account Binding 憑據（RFC 8555 §7.3.4）。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccountBinding {
    #[serde(rename = "eab_kid")]
    key_id: String,
    /// base64url 編碼的 HMAC 金鑰。
    #[serde(rename = "eab_hmac_key")]
    hmac_key: String,
}

impl ExternalAccountBinding {
    pub fn new(key_id: impl Into<String>, hmac_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            hmac_key: hmac_key.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn hmac_key(&self) -> &str {
        &self.hmac_key
    }
}

impl fmt::Debug for ExternalAccountBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAccountBinding")
            .field("key_id", &self.key_id)
            .field("hmac_key", &"<redacted>")
            .finish()
    }
}

/// 已在 CA 註冊的帳戶。
///
/// 帳戶 URL 與 key-id 取自 CA 回應的 `Location` 標頭，建立後不可修改。
#[derive(Debug, Clone)]
pub struct Account {
    url: String,
    key_id: String,
    contacts: Vec<String>,
    key_pair: KeyPair,
}

/// 帳戶的可序列化部分；私鑰另以 PEM 儲存。
#[derive(Debug, Serialize, Deserialize)]
struct AccountRecord {
    url: String,
    key_id: String,
    #[serde(default)]
    contacts: Vec<String>,
}

impl Account {
    const RECORD_FILE: &'static str = "account.json";
    const KEY_FILE: &'static str = "account.pem";

    pub(crate) fn new(url: String, contacts: Vec<String>, key_pair: KeyPair) -> Self {
        Self {
            key_id: url.clone(),
            url,
            contacts,
            key_pair,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 簽名請求時放入 `kid` 的值，與帳戶 URL 相同。
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn contacts(&self) -> &[String] {
        &self.contacts
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// 金鑰輪替成功後換上新金鑰，帳戶 URL 不變。
    pub(crate) fn with_key_pair(self, key_pair: KeyPair) -> Self {
        Self { key_pair, ..self }
    }

    /// 將帳戶寫入 `<name>/account.json` 與 `<name>/account.pem`。
    ///
    /// # 錯誤
    ///
    /// 私鑰編碼或儲存寫入失敗時回傳錯誤。
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let record = AccountRecord {
            url: self.url.clone(),
            key_id: self.key_id.clone(),
            contacts: self.contacts.clone(),
        };
        storage.write_file(
            &format!("{name}/{}", Self::KEY_FILE),
            self.key_pair.to_pem()?.as_bytes(),
        )?;
        storage.write_file(
            &format!("{name}/{}", Self::RECORD_FILE),
            &serde_json::to_vec_pretty(&record)?,
        )?;
        info!("Saved account {} as {name}", self.url);
        Ok(())
    }

    /// 從儲存中還原帳戶，金鑰種類依 PEM 標頭判斷。
    ///
    /// # 錯誤
    ///
    /// 任一檔案不存在時回傳 `StorageError::NotFound`；
    /// 內容損壞時回傳 JSON、金鑰或 `ConfigError`。
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let record: AccountRecord =
            serde_json::from_slice(&storage.read_file(&format!("{name}/{}", Self::RECORD_FILE))?)?;
        let key_pair = KeyPair::from_pem(&storage.read_file(&format!("{name}/{}", Self::KEY_FILE))?)?;
        if record.url.is_empty() || record.key_id.is_empty() {
            return Err(AcmeError::Config(format!("Stored account {name} has no URL")));
        }

        Ok(Self {
            url: record.url,
            key_id: record.key_id,
            contacts: record.contacts,
            key_pair,
        })
    }

    /// 儲存中是否已有此名稱的帳戶。
    pub fn exists(storage: &dyn Storage, name: &str) -> Result<bool> {
        Ok(storage.exists(&format!("{name}/{}", Self::RECORD_FILE))?
            && storage.exists(&format!("{name}/{}", Self::KEY_FILE))?)
    }
}
