//! ACME 的 HTTP 傳輸層：簽名請求以 `application/jose+json` 送出，
//! 回應保留狀態碼、標頭與原始本文，由上層決定如何解讀。

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{
    blocking::Client,
    header::{HeaderMap, CONTENT_TYPE, LOCATION, RETRY_AFTER},
    StatusCode,
};
use serde::de::DeserializeOwned;

use crate::error::{ProtocolError, Result};

pub const REPLAY_NONCE: &str = "Replay-Nonce";
pub const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// 已完整讀取的 HTTP 回應。
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 取得標頭值；不存在或不是可見 ASCII 時回傳 `None`。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE).filter(|n| !n.is_empty())
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    /// 解析 `Retry-After`，支援秒數與 HTTP-date 兩種格式。
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header(RETRY_AFTER.as_str())?.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        (at - Utc::now()).to_std().ok()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 非 2xx 的回應轉為 [`ProtocolError`]，保留 problem document 內容。
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ProtocolError::from_response(self.status.as_u16(), &self.body).into())
    }
}

/// ACME 會話所使用的 HTTP 傳輸介面。
///
/// 實作必須是 `Send + Sync`，以便多個授權可以並行輪詢。
pub trait Transport: Send + Sync {
    fn head(&self, url: &str) -> Result<Response>;

    fn get(&self, url: &str) -> Result<Response>;

    /// 以 `application/jose+json` POST 已簽名的 JWS。
    fn post_jose(&self, url: &str, body: &str) -> Result<Response>;
}

/// 基於 `reqwest` 阻塞式客戶端的傳輸實作。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// 建立傳輸層，`timeout` 套用在每一個請求上。
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    fn read(method: &str, url: &str, response: reqwest::blocking::Response) -> Result<Response> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();
        debug!("{method} {url} -> {status}");
        Ok(Response::new(status, headers, body))
    }
}

impl Transport for HttpTransport {
    fn head(&self, url: &str) -> Result<Response> {
        let response = self.client.head(url).send()?;
        Self::read("HEAD", url, response)
    }

    fn get(&self, url: &str) -> Result<Response> {
        let response = self.client.get(url).send()?;
        Self::read("GET", url, response)
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<Response> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(body.to_string())
            .send()?;
        Self::read("POST", url, response)
    }
}

/// 以腳本模擬 CA 的傳輸層，僅供測試使用。
#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::{HashMap, VecDeque},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use reqwest::header::{HeaderName, HeaderValue};
    use serde_json::Value;

    use super::*;
    use crate::{base64::url_decode, error::AcmeError};

    /// 一筆被記錄下來的請求。
    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub method: &'static str,
        pub url: String,
        pub body: Option<String>,
    }

    impl Recorded {
        fn part(&self, name: &str) -> Option<String> {
            let body: Value = serde_json::from_str(self.body.as_deref()?).ok()?;
            body[name].as_str().map(str::to_string)
        }

        pub fn protected(&self) -> Value {
            let part = self.part("protected").unwrap_or_default();
            serde_json::from_slice(&url_decode(&part).unwrap_or_default()).unwrap_or(Value::Null)
        }

        /// payload 的 JSON 內容；POST-as-GET 時為 `None`。
        pub fn payload(&self) -> Option<Value> {
            let part = self.part("payload")?;
            if part.is_empty() {
                return None;
            }
            serde_json::from_slice(&url_decode(&part).ok()?).ok()
        }

        pub fn raw_payload(&self) -> Option<String> {
            self.part("payload")
        }

        pub fn nonce(&self) -> Option<String> {
            self.protected()["nonce"].as_str().map(str::to_string)
        }
    }

    /// 依 (method, url) 排隊回應；佇列只剩一筆時重複使用該筆。
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<(&'static str, String), VecDeque<Response>>>,
        requests: Mutex<Vec<Recorded>>,
        nonce_url: Option<String>,
        issued: AtomicUsize,
    }

    impl MockTransport {
        /// 建立模擬傳輸層；對 `nonce_url` 的 HEAD 會回傳 `fresh-1`、`fresh-2`…
        pub fn new(nonce_url: &str) -> Self {
            Self {
                nonce_url: Some(nonce_url.to_string()),
                ..Self::default()
            }
        }

        pub fn on(&self, method: &'static str, url: &str, response: Response) -> &Self {
            self.routes
                .lock()
                .unwrap()
                .entry((method, url.to_string()))
                .or_default()
                .push_back(response);
            self
        }

        pub fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }

        pub fn requests_to(&self, method: &str, url: &str) -> Vec<Recorded> {
            self.requests()
                .into_iter()
                .filter(|r| r.method == method && r.url == url)
                .collect()
        }

        pub fn nonces_issued(&self) -> usize {
            self.issued.load(Ordering::SeqCst)
        }

        fn dispatch(&self, method: &'static str, url: &str, body: Option<&str>) -> Result<Response> {
            self.requests.lock().unwrap().push(Recorded {
                method,
                url: url.to_string(),
                body: body.map(str::to_string),
            });

            if method == "HEAD" && self.nonce_url.as_deref() == Some(url) {
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                return Ok(reply(200, Value::Null).with_header(REPLAY_NONCE, &format!("fresh-{n}")));
            }

            let mut routes = self.routes.lock().unwrap();
            let queue = routes
                .get_mut(&(method, url.to_string()))
                .ok_or_else(|| AcmeError::Config(format!("no mock route for {method} {url}")))?;
            let response = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            response.ok_or_else(|| AcmeError::Config(format!("empty mock route for {method} {url}")))
        }
    }

    impl Transport for MockTransport {
        fn head(&self, url: &str) -> Result<Response> {
            self.dispatch("HEAD", url, None)
        }

        fn get(&self, url: &str) -> Result<Response> {
            self.dispatch("GET", url, None)
        }

        fn post_jose(&self, url: &str, body: &str) -> Result<Response> {
            self.dispatch("POST", url, Some(body))
        }
    }

    /// 建立 JSON 回應；`Value::Null` 代表無本文。
    pub fn reply(status: u16, body: Value) -> Response {
        let body = if body.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        Response::new(StatusCode::from_u16(status).unwrap(), HeaderMap::new(), body)
    }

    /// 建立純文字回應。
    pub fn reply_text(status: u16, body: &str) -> Response {
        Response::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body.as_bytes().to_vec(),
        )
    }

    /// problem document 錯誤回應。
    pub fn problem(status: u16, kind: &str, detail: &str) -> Response {
        reply(
            status,
            serde_json::json!({
                "type": format!("urn:ietf:params:acme:error:{kind}"),
                "detail": detail,
                "status": status,
            }),
        )
    }

    impl Response {
        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
            self
        }
    }
}
