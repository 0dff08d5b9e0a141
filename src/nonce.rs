use std::sync::{Mutex, MutexGuard};

use log::debug;

use crate::{
    error::{ProtocolError, Result},
    transport::{Response, Transport},
};

/// 每個會話持有的 anti-replay nonce 槽位。
///
/// 槽位只保存一個值，`take` 取出後即清空，確保同一個 nonce 只會被使用一次；
/// 每個回應帶回的 `Replay-Nonce` 都會覆寫槽位。
#[derive(Debug)]
pub struct NonceManager {
    url: String,
    slot: Mutex<Option<String>>,
}

impl NonceManager {
    /// 建立新的 `NonceManager`。
    ///
    /// # 參數
    ///
    /// * `url` - 目錄中的 `newNonce` 端點。
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            slot: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    // 持鎖期間不會 panic，遭污染時內容仍然一致，直接沿用。
    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 以 HEAD 向 `newNonce` 取得新的 nonce，不經過槽位。
    ///
    /// # 錯誤
    ///
    /// 回應不是 2xx 或缺少 `Replay-Nonce` 標頭時回傳 `ProtocolError`。
    pub fn fetch<T: Transport + ?Sized>(&self, transport: &T) -> Result<String> {
        let response = transport.head(&self.url)?.error_for_status()?;
        match response.replay_nonce() {
            Some(nonce) => {
                debug!("Fetched fresh nonce from {}", self.url);
                Ok(nonce.to_string())
            }
            None => Err(ProtocolError::local(
                "badNonce",
                format!("No Replay-Nonce header in response from {}", self.url),
            )
            .into()),
        }
    }

    /// 取出槽位中的 nonce；槽位為空時向 CA 取得新的值。
    pub fn take<T: Transport + ?Sized>(&self, transport: &T) -> Result<String> {
        if let Some(nonce) = self.lock().take() {
            return Ok(nonce);
        }
        self.fetch(transport)
    }

    /// 從任何回應（成功或失敗）收取 `Replay-Nonce`，取代槽位中的值。
    pub fn harvest(&self, response: &Response) {
        if let Some(nonce) = response.replay_nonce() {
            *self.lock() = Some(nonce.to_string());
        }
    }

    /// 丟棄槽位中的值，用於 `badNonce` 之後強制重新取得。
    pub fn discard(&self) {
        self.lock().take();
    }

    /// 查看槽位內容但不取出。
    pub fn peek(&self) -> Option<String> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AcmeError,
        transport::mock::{reply, MockTransport},
    };
    use serde_json::json;

    const NONCE_URL: &str = "https://ca/nonce";

    #[test]
    fn test_take_fetches_when_empty_and_consumes_slot() -> Result<()> {
        let transport = MockTransport::new(NONCE_URL);
        let nonces = NonceManager::new(NONCE_URL);

        assert_eq!(nonces.take(&transport)?, "fresh-1");
        nonces.harvest(&reply(200, json!({})).with_header("Replay-Nonce", "harvested"));
        assert_eq!(nonces.peek().as_deref(), Some("harvested"));
        assert_eq!(nonces.take(&transport)?, "harvested");
        assert_eq!(nonces.peek(), None);
        assert_eq!(nonces.take(&transport)?, "fresh-2");
        assert_eq!(transport.nonces_issued(), 2);
        Ok(())
    }

    #[test]
    fn test_harvest_from_error_response_and_ignore_missing_header() {
        let nonces = NonceManager::new(NONCE_URL);
        nonces.harvest(&reply(400, json!({})).with_header("Replay-Nonce", "from-error"));
        nonces.harvest(&reply(200, json!({})));
        assert_eq!(nonces.peek().as_deref(), Some("from-error"));

        nonces.discard();
        assert_eq!(nonces.peek(), None);
    }

    #[test]
    fn test_fetch_without_header_is_protocol_error() {
        let transport = MockTransport::default();
        transport.on("HEAD", "https://other/nonce", reply(200, json!(null)));
        let nonces = NonceManager::new("https://other/nonce");

        match nonces.fetch(&transport) {
            Err(AcmeError::Protocol(e)) => assert!(e.detail().contains("Replay-Nonce")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
