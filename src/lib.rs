//! # ACME Client Core
//!
//! 本庫實作 ACME（RFC 8555）協議的客戶端核心：建構、簽名並依序送出驅動整個憑證簽發流程的 HTTPS 請求，
//! 從帳戶註冊、建立訂單、網域授權、挑戰驗證到憑證下載。
//!
//! ## 主要模組
//!
//! - **key_pair / jwk**：RSA 與 ECDSA（P-256/P-384/P-521）金鑰、公鑰 JWK 與 thumbprint。
//! - **jws**：嵌入 JWK、以 key-id 簽名、External Account Binding 與金鑰輪替的 JWS。
//! - **nonce**：每個會話單一的 nonce 槽位，遇到 `badNonce` 時重試一次。
//! - **session**：協議流程本身，包含並行的授權輪詢與取消。
//! - **storage / account**：帳戶金鑰與帳戶資料的持久化介面。
//!
//! ## 示例
//!
//! ```no_run
//! use acme_core::{
//!     account::Account,
//!     challenge::{Authorization, Challenge, ChallengeStrategy, FirstSupported},
//!     error::Result,
//!     key_pair::{Curve, KeyPair},
//!     payload::Identifier,
//!     poll::CancelToken,
//!     session::SessionBuilder,
//!     storage::FileStorage,
//! };
//!
//! // 佈署 http-01 回應的策略，實際佈署方式由使用者決定。
//! struct Webroot(FirstSupported);
//!
//! impl ChallengeStrategy for Webroot {
//!     fn select<'a>(&self, authz: &'a Authorization) -> Option<&'a Challenge> {
//!         self.0.select(authz)
//!     }
//!
//!     fn prepare(&self, _: &Authorization, challenge: &Challenge, key_auth: &str) -> Result<()> {
//!         std::fs::write(format!("/var/www{}", challenge.http_path()), key_auth)
//!             .map_err(|e| acme_core::storage::StorageError::from(e).into())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let session = SessionBuilder::new()
//!         .directory_url(acme_core::config::LETS_ENCRYPT_STAGING_DIRECTORY)
//!         .build()?;
//!     let storage = FileStorage::open("/var/lib/acme")?;
//!
//!     let account = if Account::exists(&storage, "user@example.com")? {
//!         Account::load(&storage, "user@example.com")?
//!     } else {
//!         let account = session.register_or_lookup_account(
//!             KeyPair::generate_ec(Curve::P256)?,
//!             &["user@example.com".to_string()],
//!             None,
//!         )?;
//!         account.save(&storage, "user@example.com")?;
//!         account
//!     };
//!
//!     let chain = session.issue_certificate(
//!         &account,
//!         &[Identifier::dns("example.com")],
//!         &KeyPair::generate_ec(Curve::P256)?,
//!         &Webroot(FirstSupported::new(["http-01"])),
//!         &CancelToken::new(),
//!     )?;
//!     println!("{}", chain.pem());
//!     Ok(())
//! }
//! ```
//!
//! 更多詳細 API 說明請參考各個模組的文檔。

pub mod account;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod config;
pub mod csr;
pub mod directory;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod session;
pub mod signature;
pub mod storage;
pub mod transport;

pub use error::{AcmeError, Result};
pub use session::{Session, SessionBuilder};
