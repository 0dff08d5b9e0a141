//! ACME 會話：將目錄、nonce 與簽名組合成完整的協議流程。

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use log::{info, warn};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::{
    account::{Account, ExternalAccountBinding},
    certificate::CertificateChain,
    challenge::{
        Authorization, AuthorizationStatus, Challenge, ChallengeStatus, ChallengeStrategy,
        FirstSupported,
    },
    config::SessionConfig,
    csr::Csr,
    directory::Directory,
    error::{AcmeError, ProtocolError, Result},
    jws::{sign_external_binding, sign_key_change, sign_with_jwk, sign_with_kid},
    key_pair::KeyPair,
    nonce::NonceManager,
    order::{Order, OrderStatus},
    payload::{
        ChallengeResponsePayload, FinalizeOrderPayload, Identifier, NewAccountPayload,
        NewOrderPayload, Payload, PayloadT, RevocationPayload,
    },
    poll::{poll_until, Attempt, CancelToken, PollPolicy},
    transport::{HttpTransport, Response, Transport},
};

/// 簽名請求時識別帳戶的方式。
#[derive(Clone, Copy)]
enum Signer<'a> {
    /// 嵌入公鑰 JWK，帳戶 URL 尚未知時使用。
    Jwk(&'a KeyPair),
    /// 以帳戶 URL 作為 `kid`。
    Kid(&'a Account),
}

#[derive(Deserialize)]
struct AccountResource {
    #[serde(default)]
    contact: Vec<String>,
}

/// 與單一 CA 互動的會話。
///
/// 建立時取得一次目錄，之後所有簽名請求共用同一個 nonce 槽位；
/// 會話可在多個執行緒間共用（只要傳輸層是 `Sync`）。
pub struct Session<T: Transport = HttpTransport> {
    config: SessionConfig,
    transport: T,
    directory: Directory,
    nonces: NonceManager,
}

impl Session<HttpTransport> {
    /// 以 `reqwest` 傳輸層建立會話並取得目錄。
    ///
    /// # 錯誤
    ///
    /// 設定不合法、目錄無法取得或缺少 `newNonce` 時回傳錯誤。
    pub fn new(config: SessionConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout, &config.user_agent)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Session<T> {
    /// 以自訂傳輸層建立會話並取得目錄。
    pub fn with_transport(config: SessionConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let directory = Directory::fetch(&transport, &config.directory_url)?;
        let nonces = NonceManager::new(directory.new_nonce()?);
        info!("ACME session ready for {}", config.directory_url);
        Ok(Self {
            config,
            transport,
            directory,
            nonces,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 依設定中的 `challenge_types` 建立預設的挑戰選擇策略。
    pub fn challenge_strategy(&self) -> FirstSupported {
        FirstSupported::new(self.config.challenge_types.iter().map(String::as_str))
    }

    /// 重新取得目錄；`newNonce` 改變時同時重置 nonce 槽位。
    pub fn refresh_directory(&mut self) -> Result<()> {
        let directory = Directory::fetch(&self.transport, &self.config.directory_url)?;
        if directory.new_nonce()? != self.nonces.url() {
            self.nonces = NonceManager::new(directory.new_nonce()?);
        }
        self.directory = directory;
        Ok(())
    }

    /// 簽名並送出請求，遇到 `badNonce` 時以新的 nonce 重送一次。
    ///
    /// 回傳原始回應，不論狀態碼；第二次 `badNonce` 也原樣回傳。
    fn send_signed(&self, url: &str, signer: Signer<'_>, payload: &Payload) -> Result<Response> {
        let mut retried = false;
        loop {
            let nonce = self.nonces.take(&self.transport)?;
            let jws = match signer {
                Signer::Jwk(key) => sign_with_jwk(payload, key, &nonce, url)?,
                Signer::Kid(account) => {
                    sign_with_kid(payload, account.key_pair(), &nonce, url, account.key_id())?
                }
            };

            let response = self.transport.post_jose(url, &jws.to_json()?)?;
            self.nonces.harvest(&response);

            if response.is_success() || retried {
                return Ok(response);
            }
            if !ProtocolError::from_response(response.status().as_u16(), response.body())
                .is_bad_nonce()
            {
                return Ok(response);
            }

            warn!("CA rejected nonce for {url}, retrying once with a fresh nonce");
            self.nonces.discard();
            retried = true;
        }
    }

    /// 送出簽名請求，非 2xx 轉為 `ProtocolError`。
    fn post(&self, url: &str, signer: Signer<'_>, payload: &Payload) -> Result<Response> {
        self.send_signed(url, signer, payload)?.error_for_status()
    }

    fn post_as_get(&self, account: &Account, url: &str) -> Result<Response> {
        self.post(url, Signer::Kid(account), &Payload::post_as_get())
    }

    fn validated<P: PayloadT>(payload: &P) -> Result<Payload> {
        payload.validate().map_err(AcmeError::Config)?;
        Ok(payload.to_payload()?)
    }

    /// 註冊新帳戶，若 CA 已有此金鑰的帳戶則沿用。
    ///
    /// # 參數
    ///
    /// * `key` - 帳戶金鑰。
    /// * `contacts` - 聯絡資訊，沒有 scheme 的會補上 `mailto:`。
    /// * `eab` - External Account Binding；未提供時使用設定中的值。
    ///
    /// # 錯誤
    ///
    /// * 目錄要求 EAB 但未提供時回傳 `ConfigError`，不送出任何請求。
    /// * CA 拒絕或回應缺少 `Location` 時回傳 `ProtocolError`。
    pub fn register_or_lookup_account(
        &self,
        key: KeyPair,
        contacts: &[String],
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<Account> {
        let url = self.directory.new_account()?;
        let eab = eab.or(self.config.external_account_binding.as_ref());
        if self.directory.external_account_required() && eab.is_none() {
            return Err(AcmeError::Config(
                "CA requires external account binding, but none was provided".into(),
            ));
        }

        let mut payload = NewAccountPayload::new(contacts, self.config.terms_of_service_agreed);
        if let Some(eab) = eab {
            payload = payload.external_account_binding(sign_external_binding(
                eab,
                &key.public_jwk()?,
                url,
            )?);
        }

        let response = self.send_signed(url, Signer::Jwk(&key), &Self::validated(&payload)?)?;
        let response = if response.status() == StatusCode::CONFLICT && response.location().is_some() {
            info!("Account already exists for this key");
            response
        } else {
            response.error_for_status()?
        };

        let account_url = Self::location(&response, "new-account")?;
        info!("Account registered at {account_url}");
        Ok(Account::new(account_url, payload.contact().to_vec(), key))
    }

    /// 只查詢既有帳戶（`onlyReturnExisting`），不會建立新帳戶。
    pub fn lookup_account(&self, key: KeyPair) -> Result<Account> {
        let url = self.directory.new_account()?;
        let payload = Self::validated(&NewAccountPayload::lookup())?;
        let response = self.post(url, Signer::Jwk(&key), &payload)?;
        let account_url = Self::location(&response, "account lookup")?;
        let contacts = response.json::<AccountResource>()?.contact;
        Ok(Account::new(account_url, contacts, key))
    }

    fn location(response: &Response, what: &str) -> Result<String> {
        response.location().map(str::to_string).ok_or_else(|| {
            ProtocolError::local("malformed", format!("{what} response has no Location header")).into()
        })
    }

    /// 為識別項建立新訂單，訂單 URL 取自 `Location`。
    ///
    /// # 錯誤
    ///
    /// 識別項為空或不合法時回傳 `ConfigError`；CA 回應非 2xx 時回傳 `ProtocolError`。
    pub fn create_order(&self, account: &Account, identifiers: &[Identifier]) -> Result<Order> {
        let url = self.directory.new_order()?;
        let payload = Self::validated(&NewOrderPayload::new(identifiers))?;
        let response = self.post(url, Signer::Kid(account), &payload)?;
        let order_url = Self::location(&response, "new-order")?;
        let order = response.json::<Order>()?.with_url(&order_url);
        info!(
            "Order {order_url} created for {} identifier(s), status {}",
            order.identifiers.len(),
            order.status
        );
        Ok(order)
    }

    /// 以 POST-as-GET 取得授權物件。
    pub fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        Ok(self
            .post_as_get(account, url)?
            .json::<Authorization>()?
            .with_url(url))
    }

    /// 通知 CA 開始驗證挑戰（RFC 8555 §7.5.1）。
    pub fn trigger_challenge(&self, account: &Account, url: &str) -> Result<Challenge> {
        let payload = Self::validated(&ChallengeResponsePayload::default())?;
        Ok(self.post(url, Signer::Kid(account), &payload)?.json()?)
    }

    /// 輪詢授權直到狀態離開 `pending`。
    ///
    /// `invalid` 等終結狀態會直接回傳而不重試，由呼叫端決定如何處理。
    pub fn poll_authorization(
        &self,
        account: &Account,
        url: &str,
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<Authorization> {
        poll_until(url, policy, cancel, || {
            let response = self.post_as_get(account, url)?;
            let authorization = response.json::<Authorization>()?.with_url(url);
            Ok(if authorization.status.is_terminal() {
                Attempt::Done(authorization)
            } else {
                Attempt::Retry(response.retry_after())
            })
        })
    }

    /// 以最多 `config.workers` 個執行緒並行輪詢多個授權，結果依輸入順序排列。
    ///
    /// 任一授權失敗（錯誤或非 `valid` 的終結狀態）時取消其餘輪詢，
    /// 並回傳輸入順序中第一個失敗。
    pub fn poll_authorizations(
        &self,
        account: &Account,
        urls: &[String],
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<Vec<Authorization>> {
        let group = &cancel.child();
        let next = &AtomicUsize::new(0);
        let workers = self.config.workers.max(1).min(urls.len());

        let mut outcomes: Vec<(usize, Result<Authorization>)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            let Some(url) = urls.get(index) else {
                                break done;
                            };
                            let outcome = self
                                .poll_authorization(account, url, policy, group)
                                .and_then(|authz| match authz.status {
                                    AuthorizationStatus::Valid => Ok(authz),
                                    _ => Err(authorization_failure(&authz)),
                                });
                            if outcome.is_err() {
                                group.cancel();
                            }
                            done.push((index, outcome));
                        }
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        if cancel.is_cancelled() {
            return Err(AcmeError::Cancelled);
        }

        outcomes.sort_by_key(|(index, _)| *index);
        if let Some(index) = outcomes
            .iter()
            .position(|(_, o)| matches!(o, Err(e) if !matches!(e, AcmeError::Cancelled)))
        {
            let (_, failure) = outcomes.swap_remove(index);
            return failure.map(|_| Vec::new());
        }
        outcomes.into_iter().map(|(_, o)| o).collect()
    }

    /// 完成訂單的所有授權。
    ///
    /// 對每個 `pending` 授權：以 `strategy` 選出挑戰、佈署回應、觸發驗證，
    /// 最後並行輪詢直到全部 `valid`。`processing` 的授權已在驗證中，只加入輪詢。
    ///
    /// # 錯誤
    ///
    /// 任何授權失敗即回傳錯誤；沒有可用挑戰時回傳 `ConfigError`；
    /// `cancel` 被取消後不再送出請求，回傳 `Cancelled`。
    pub fn authorize_order(
        &self,
        account: &Account,
        order: &Order,
        strategy: &dyn ChallengeStrategy,
        cancel: &CancelToken,
    ) -> Result<Vec<Authorization>> {
        let thumbprint = account.key_pair().thumbprint()?;
        let mut pending = Vec::new();

        for url in &order.authorizations {
            cancel.check()?;
            let authz = self.fetch_authorization(account, url)?;
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Processing => {
                    pending.push(url.clone());
                    continue;
                }
                AuthorizationStatus::Pending => {}
                _ => return Err(authorization_failure(&authz)),
            }

            let challenge = strategy.select(&authz).ok_or_else(|| {
                AcmeError::Config(format!(
                    "No supported challenge for {}",
                    authz.identifier.value
                ))
            })?;
            if challenge.status == ChallengeStatus::Pending {
                strategy.prepare(&authz, challenge, &challenge.key_authorization(&thumbprint))?;
                cancel.check()?;
                self.trigger_challenge(account, &challenge.url)?;
                info!(
                    "Triggered {} challenge for {}",
                    challenge.challenge_type, authz.identifier.value
                );
            }
            pending.push(url.clone());
        }

        self.poll_authorizations(account, &pending, &self.config.poll, cancel)
    }

    /// 以 POST-as-GET 取得訂單的最新狀態。
    ///
    /// # 錯誤
    ///
    /// 狀態倒退（例如 `invalid` 變成 `valid`）時回傳 `ProtocolError`。
    pub fn refresh_order(&self, account: &Account, order: &Order) -> Result<Order> {
        let latest = self.post_as_get(account, order.url())?.json::<Order>()?;
        let mut updated = order.clone();
        updated.update_from(latest)?;
        Ok(updated)
    }

    /// 輪詢訂單直到狀態離開 `pending` 與 `processing`。
    pub fn poll_order(
        &self,
        account: &Account,
        order: &Order,
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<Order> {
        let mut current = order.clone();
        poll_until(order.url(), policy, cancel, || {
            let response = self.post_as_get(account, current.url())?;
            current.update_from(response.json::<Order>()?)?;
            Ok(match current.status {
                OrderStatus::Pending | OrderStatus::Processing => {
                    Attempt::Retry(response.retry_after())
                }
                _ => Attempt::Done(current.clone()),
            })
        })
    }

    /// 提交 CSR 以完成訂單，回傳更新後的訂單。
    ///
    /// 狀態為 `processing` 時，呼叫端需再以 [`Session::poll_order`] 等待結果。
    ///
    /// # 錯誤
    ///
    /// 訂單不是 `ready` 時回傳 `ProtocolError`（`orderNotReady`），不送出請求。
    pub fn finalize(&self, account: &Account, order: &Order, csr_der: &[u8]) -> Result<Order> {
        if order.status != OrderStatus::Ready {
            return Err(ProtocolError::local(
                "orderNotReady",
                format!("Order {} is {}, expected ready", order.url(), order.status),
            )
            .into());
        }

        let payload = Self::validated(&FinalizeOrderPayload::new(csr_der))?;
        let latest = self
            .post(&order.finalize, Signer::Kid(account), &payload)?
            .json::<Order>()?;
        let mut updated = order.clone();
        updated.update_from(latest)?;
        info!("Order {} finalized, status {}", updated.url(), updated.status);
        Ok(updated)
    }

    /// 下載憑證鏈（POST-as-GET）。
    ///
    /// # 錯誤
    ///
    /// 訂單不是 `valid` 或沒有憑證 URL 時回傳 `ProtocolError`，不送出請求。
    pub fn download_certificate(&self, account: &Account, order: &Order) -> Result<CertificateChain> {
        let url = match (&order.status, &order.certificate) {
            (OrderStatus::Valid, Some(url)) => url,
            _ => {
                return Err(ProtocolError::local(
                    "orderNotReady",
                    format!(
                        "Order {} is {}, certificate is only available once valid",
                        order.url(),
                        order.status
                    ),
                )
                .into())
            }
        };

        let response = self.post_as_get(account, url)?;
        let chain = CertificateChain::from_pem(&response.text())?;
        info!("Downloaded certificate from {url}");
        Ok(chain)
    }

    /// 完整的簽發流程：建立訂單、完成授權、提交 CSR、等待並下載憑證。
    ///
    /// # 參數
    ///
    /// * `cert_key` - 憑證金鑰，用於簽署 CSR，不可與帳戶金鑰相同。
    ///
    /// # 錯誤
    ///
    /// 每個步驟前都會檢查 `cancel`，取消後回傳 `Cancelled` 且不再送出請求。
    pub fn issue_certificate(
        &self,
        account: &Account,
        identifiers: &[Identifier],
        cert_key: &KeyPair,
        strategy: &dyn ChallengeStrategy,
        cancel: &CancelToken,
    ) -> Result<CertificateChain> {
        cancel.check()?;
        let mut order = self.create_order(account, identifiers)?;

        if order.status == OrderStatus::Pending {
            self.authorize_order(account, &order, strategy, cancel)?;
            order = self.poll_order(account, &order, &self.config.poll, cancel)?;
        }
        if order.status == OrderStatus::Ready {
            let csr = Csr::from_identifiers(&order.identifiers).build(cert_key)?;
            cancel.check()?;
            order = self.finalize(account, &order, &csr)?;
        }
        if !order.status.is_terminal() {
            order = self.poll_order(account, &order, &self.config.poll, cancel)?;
        }
        if order.status == OrderStatus::Invalid {
            return Err(order_failure(&order));
        }

        cancel.check()?;
        self.download_certificate(account, &order)
    }

    /// 以新金鑰取代帳戶金鑰（RFC 8555 §7.3.5）。
    pub fn change_key(&self, account: Account, new_key: KeyPair) -> Result<Account> {
        let url = self.directory.key_change()?;
        let inner = sign_key_change(&new_key, account.url(), account.key_pair().public_jwk()?, url)?;
        self.post(url, Signer::Kid(&account), &Payload::from_claims(&inner)?)?;
        info!("Rolled over key for account {}", account.url());
        Ok(account.with_key_pair(new_key))
    }

    /// 撤銷憑證（RFC 8555 §7.6），`reason` 為 RFC 5280 的撤銷原因代碼。
    pub fn revoke_certificate(
        &self,
        account: &Account,
        certificate: &CertificateChain,
        reason: Option<u8>,
    ) -> Result<()> {
        let url = self.directory.revoke_cert()?;
        let payload = Self::validated(&RevocationPayload::new(&certificate.leaf_der()?, reason))?;
        self.post(url, Signer::Kid(account), &payload)?;
        info!("Revoked certificate via {url}");
        Ok(())
    }

    /// 依 `renew_before_days` 判斷憑證是否需要續約。
    pub fn needs_renewal(&self, certificate: &CertificateChain) -> Result<bool> {
        Ok(certificate.should_renew(self.config.renew_before_days)?)
    }
}

fn authorization_failure(authz: &Authorization) -> AcmeError {
    let problem = authz.challenges.iter().find_map(|c| c.error.clone());
    match problem {
        Some(problem) => ProtocolError {
            http_status: None,
            problem,
        }
        .into(),
        None => ProtocolError::local(
            "unauthorized",
            format!(
                "Authorization for {} is {:?}",
                authz.identifier.value, authz.status
            ),
        )
        .into(),
    }
}

fn order_failure(order: &Order) -> AcmeError {
    match &order.error {
        Some(problem) => ProtocolError {
            http_status: None,
            problem: problem.clone(),
        }
        .into(),
        None => ProtocolError::local("orderInvalid", format!("Order {} is invalid", order.url())).into(),
    }
}

/// 用於構建 [`Session`] 的構造器。
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以現有設定為起點。
    pub fn from_config(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn directory_url(mut self, url: &str) -> Self {
        self.config.directory_url = url.to_string();
        self
    }

    pub fn terms_of_service_agreed(mut self, agreed: bool) -> Self {
        self.config.terms_of_service_agreed = agreed;
        self
    }

    /// 設置 External Account Binding。
    ///
    /// # 參數
    ///
    /// * `key_id` - CA 發放的 key identifier。
    /// * `hmac_key` - base64url 編碼的 HMAC 金鑰。
    pub fn external_account_binding(mut self, key_id: &str, hmac_key: &str) -> Self {
        self.config.external_account_binding = Some(ExternalAccountBinding::new(key_id, hmac_key));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn challenge_types(mut self, types: &[&str]) -> Self {
        self.config.challenge_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn renew_before_days(mut self, days: u32) -> Self {
        self.config.renew_before_days = days;
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.user_agent = user_agent.to_string();
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 以 `reqwest` 傳輸層建立會話。
    pub fn build(self) -> Result<Session> {
        Session::new(self.config)
    }

    /// 以自訂傳輸層建立會話。
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<Session<T>> {
        Session::with_transport(self.config, transport)
    }
}
