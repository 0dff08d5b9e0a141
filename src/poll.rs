//! 有上限的輪詢：指數退避、整體逾時、`Retry-After` 與取消。

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{AcmeError, Result};

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// 輪詢策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// 最多嘗試次數（至少一次）。
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// 從第一次嘗試起算的整體逾時。
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(180),
        }
    }
}

/// `Duration` 以毫秒整數序列化。
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// 可複製的取消旗標；子 token 會觀察到父 token 的取消，反之則否。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// 建立子 token。
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// 已取消時回傳 `AcmeError::Cancelled`。
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AcmeError::Cancelled);
        }
        Ok(())
    }
}

/// 單次輪詢的結果。
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// 尚未完成；可附帶伺服器要求的 `Retry-After`。
    Retry(Option<Duration>),
}

/// 重複呼叫 `step` 直到回傳 [`Attempt::Done`]。
///
/// `step` 回傳的錯誤立即往上傳遞，不重試。
///
/// # 錯誤
///
/// * 超過 `max_attempts` 或 `timeout` 時回傳 `AcmeError::Timeout`。
/// * `cancel` 被取消時回傳 `AcmeError::Cancelled`。
pub fn poll_until<T, F>(
    what: &str,
    policy: &PollPolicy,
    cancel: &CancelToken,
    mut step: F,
) -> Result<T>
where
    F: FnMut() -> Result<Attempt<T>>,
{
    let started = Instant::now();
    let mut backoff = policy.initial_delay;
    let mut attempt = 0;

    loop {
        cancel.check()?;
        attempt += 1;

        let retry_after = match step()? {
            Attempt::Done(value) => {
                debug!("{what} completed after {attempt} attempt(s)");
                return Ok(value);
            }
            Attempt::Retry(retry_after) => retry_after,
        };

        let elapsed = started.elapsed();
        if attempt >= policy.max_attempts.max(1) || elapsed >= policy.timeout {
            return Err(AcmeError::Timeout(elapsed));
        }

        let delay = next_delay(backoff, retry_after, policy.timeout - elapsed);
        debug!("{what} not ready (attempt {attempt}), waiting {}ms", delay.as_millis());
        sleep(delay, cancel)?;
        backoff = backoff.saturating_mul(2).min(policy.max_delay);
    }
}

fn next_delay(backoff: Duration, retry_after: Option<Duration>, remaining: Duration) -> Duration {
    backoff.max(retry_after.unwrap_or_default()).min(remaining)
}

fn sleep(delay: Duration, cancel: &CancelToken) -> Result<()> {
    let deadline = Instant::now() + delay;
    loop {
        cancel.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL));
    }
}
