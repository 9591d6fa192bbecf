//! ACME (RFC 8555) 客戶端。
//!
//! 負責帳戶註冊、建立訂單、完成授權挑戰、提交 CSR 與下載憑證。
//! 所有請求皆以帳戶金鑰簽署的 JWS 送出，讀取資源時使用 POST-as-GET。

use std::{
    cell::RefCell,
    thread,
    time::{Duration, Instant},
};

use reqwest::{
    blocking::{Client, Response},
    header::{ACCEPT, CONTENT_TYPE, LOCATION},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::{Account, Registration},
    base64::Base64,
    challenge::{Authorization, ChallengeStatus},
    config::KeyType,
    csr::{CsrError, CSR},
    directory::{Directory, DirectoryError},
    jws::{Jws, JwsError},
    key_pair::{KeyError, KeyPair},
    nonce::Nonce,
    order::{Order, OrderStatus, Problem},
    payload::{
        ChallengeValidationPayload, FinalizeOrderPayload, NewAccountPayload, NewOrderPayload,
        PayloadT,
    },
    provider::{ChallengeProvider, ProviderError},
};

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const PEM_CHAIN_CONTENT_TYPE: &str = "application/pem-certificate-chain";
const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

/// 提交 CSR 後等待訂單完成的上限與間隔。
pub const ORDER_TIMEOUT: Duration = Duration::from_secs(30);
pub const ORDER_POLLING_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Key pair error: {0}")]
    Key(#[from] KeyError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] openssl::error::ErrorStack),
    #[error("Challenge provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),
    #[error("ACME server returned {status} for {url}: {problem}")]
    Server {
        url: String,
        status: reqwest::StatusCode,
        problem: Problem,
    },
    #[error("Missing Location header in response from {0}")]
    MissingLocation(String),
    #[error("Account is not registered")]
    NotRegistered,
    #[error("No challenge provider configured")]
    NoChallengeProvider,
    #[error("A challenge provider is already configured")]
    ProviderAlreadySet,
    #[error("No {challenge_type} challenge offered for {domain}")]
    NoMatchingChallenge {
        domain: String,
        challenge_type: &'static str,
    },
    #[error("Authorization for {domain} failed: {reason}")]
    AuthorizationFailed { domain: String, reason: String },
    #[error("Order failed: {0}")]
    OrderFailed(String),
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },
}

type Result<T> = std::result::Result<T, AcmeError>;

/// 簽發完成的憑證鏈與私鑰，皆為 PEM。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// 憑證的主要網域（第一個 SAN）。
    pub domain: String,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// 憑證機構的操作介面。
pub trait CertificateAuthority {
    /// 向 CA 註冊帳戶，成功後寫入 `account.registration`。
    fn register(&mut self, account: &mut Account) -> Result<()>;

    /// 綁定本次簽發使用的驗證機制，只能設定一次。
    fn set_challenge_provider(&mut self, provider: ChallengeProvider) -> Result<()>;

    /// 為 `domains` 取得一張憑證，第一個網域為主要名稱。
    fn obtain(&mut self, account: &Account, domains: &[String]) -> Result<IssuedCertificate>;
}

/// 透過 HTTP 與 ACME 伺服器互動的 [`CertificateAuthority`]。
#[derive(Debug)]
pub struct AcmeClient {
    http: Client,
    directory_url: String,
    key_type: KeyType,
    directory: Option<Directory>,
    provider: Option<ChallengeProvider>,
    /// 上一個回應留下、尚未使用的 nonce。
    last_nonce: RefCell<Option<String>>,
}

impl AcmeClient {
    /// `key_type` 用於每張憑證新產生的私鑰。
    pub fn new(http: Client, directory_url: &str, key_type: KeyType) -> Self {
        Self {
            http,
            directory_url: directory_url.to_string(),
            key_type,
            directory: None,
            provider: None,
            last_nonce: RefCell::new(None),
        }
    }

    /// 第一次使用時才取得目錄。
    fn directory(&mut self) -> Result<Directory> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }
        let directory = Directory::fetch(&self.http, &self.directory_url)?;
        debug!(url = %self.directory_url, "fetched ACME directory");
        self.directory = Some(directory.clone());
        Ok(directory)
    }

    /// 送出簽署過的請求；遇到 `badNonce` 時以新的 nonce 重送一次。
    ///
    /// 優先使用上一個回應附帶的 nonce，用盡時才向 `newNonce` 取得。
    fn post(
        &self,
        directory: &Directory,
        key_pair: &KeyPair,
        kid: Option<&str>,
        url: &str,
        payload: &Base64,
        accept: &str,
    ) -> Result<Response> {
        let nonce = Nonce::new(self.http.clone(), &directory.new_nonce)
            .with_cached(self.last_nonce.take());
        let mut retried = false;
        loop {
            let jws = Jws::sign(&nonce, key_pair, kid, url, payload)?;
            let response = self
                .http
                .post(url)
                .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
                .header(ACCEPT, accept)
                .body(jws.to_json()?)
                .send()?;
            nonce.remember(response.headers());

            let status = response.status();
            if status.is_success() {
                self.last_nonce.replace(nonce.take_cached());
                return Ok(response);
            }
            let body = response.text().unwrap_or_default();
            let problem = parse_problem(&body);
            if problem.problem_type == BAD_NONCE && !retried {
                debug!(url, "nonce rejected, retrying");
                retried = true;
                continue;
            }
            self.last_nonce.replace(nonce.take_cached());
            return Err(AcmeError::Server {
                url: url.to_string(),
                status,
                problem,
            });
        }
    }

    fn post_payload<P: PayloadT>(
        &self,
        directory: &Directory,
        key_pair: &KeyPair,
        kid: Option<&str>,
        url: &str,
        payload: &P,
    ) -> Result<Response> {
        payload
            .validate()
            .map_err(|e| AcmeError::InvalidPayload(e.to_string()))?;
        self.post(
            directory,
            key_pair,
            kid,
            url,
            &payload.to_base64()?,
            "application/json",
        )
    }

    fn post_as_get(
        &self,
        directory: &Directory,
        account: &Account,
        url: &str,
        accept: &str,
    ) -> Result<Response> {
        let kid = account.kid().ok_or(AcmeError::NotRegistered)?;
        self.post(
            directory,
            &account.key_pair,
            Some(kid),
            url,
            &Base64::new(b""),
            accept,
        )
    }

    fn fetch_authorization(
        &self,
        directory: &Directory,
        account: &Account,
        url: &str,
    ) -> Result<Authorization> {
        let response = self.post_as_get(directory, account, url, "application/json")?;
        Ok(Authorization::from_json(&response.bytes()?)?)
    }

    fn fetch_order(&self, directory: &Directory, account: &Account, url: &str) -> Result<Order> {
        let response = self.post_as_get(directory, account, url, "application/json")?;
        Ok(Order::from_json(&response.bytes()?)?)
    }

    /// 通知 CA 開始驗證，並輪詢授權直到有結果。
    fn validate_challenge(
        &self,
        directory: &Directory,
        account: &Account,
        authorization_url: &str,
        challenge_url: &str,
        domain: &str,
        timing: (Duration, Duration),
    ) -> Result<()> {
        let kid = account.kid().ok_or(AcmeError::NotRegistered)?;
        self.post_payload(
            directory,
            &account.key_pair,
            Some(kid),
            challenge_url,
            &ChallengeValidationPayload::new(),
        )?;

        let (timeout, interval) = timing;
        poll(&format!("authorization of {}", domain), timeout, interval, || {
            let authorization = self.fetch_authorization(directory, account, authorization_url)?;
            match authorization.status {
                ChallengeStatus::Valid => Ok(Some(())),
                ChallengeStatus::Pending | ChallengeStatus::Processing => Ok(None),
                status => Err(AcmeError::AuthorizationFailed {
                    domain: domain.to_string(),
                    reason: authorization
                        .failure()
                        .map(Problem::to_string)
                        .unwrap_or_else(|| status.as_str().to_string()),
                }),
            }
        })
    }

    /// 逐一完成訂單中尚未有效的授權。
    fn authorize(
        &self,
        directory: &Directory,
        account: &Account,
        provider: &ChallengeProvider,
        order: &Order,
    ) -> Result<()> {
        let thumbprint = account.key_pair.thumbprint()?;
        let solver = provider.solver()?;
        let challenge_type = provider.challenge_type();

        for authorization_url in &order.authorizations {
            let authorization = self.fetch_authorization(directory, account, authorization_url)?;
            let domain = authorization.domain();
            if authorization.status == ChallengeStatus::Valid {
                debug!(domain, "authorization already valid");
                continue;
            }

            let challenge = authorization.challenge(challenge_type).ok_or_else(|| {
                AcmeError::NoMatchingChallenge {
                    domain: domain.clone(),
                    challenge_type: challenge_type.as_str(),
                }
            })?;
            let key_authorization = challenge.key_authorization(&thumbprint);

            info!(domain, challenge = challenge_type.as_str(), "solving challenge");
            let result = solver
                .present(&domain, &challenge.token, &key_authorization)
                .map_err(AcmeError::from)
                .and_then(|_| {
                    self.validate_challenge(
                        directory,
                        account,
                        authorization_url,
                        &challenge.url,
                        &domain,
                        provider.validation_timing(),
                    )
                });
            if let Err(e) = solver.cleanup(&domain, &challenge.token, &key_authorization) {
                warn!(domain, error = %e, "challenge cleanup failed");
            }
            result?;
            info!(domain, "authorization valid");
        }
        Ok(())
    }
}

impl CertificateAuthority for AcmeClient {
    fn register(&mut self, account: &mut Account) -> Result<()> {
        let directory = self.directory()?;
        let response = self.post_payload(
            &directory,
            &account.key_pair,
            None,
            &directory.new_account,
            &NewAccountPayload::new(&account.email),
        )?;
        let url = location(&response, &directory.new_account)?;
        info!(account = %url, email = %account.email, "registered ACME account");
        account.registration = Some(Registration { url });
        Ok(())
    }

    fn set_challenge_provider(&mut self, provider: ChallengeProvider) -> Result<()> {
        if self.provider.is_some() {
            return Err(AcmeError::ProviderAlreadySet);
        }
        self.provider = Some(provider);
        Ok(())
    }

    fn obtain(&mut self, account: &Account, domains: &[String]) -> Result<IssuedCertificate> {
        if self.provider.is_none() {
            return Err(AcmeError::NoChallengeProvider);
        }
        let kid = account.kid().ok_or(AcmeError::NotRegistered)?;
        let directory = self.directory()?;
        let provider = self
            .provider
            .as_ref()
            .ok_or(AcmeError::NoChallengeProvider)?;

        info!(?domains, "requesting certificate");
        let response = self.post_payload(
            &directory,
            &account.key_pair,
            Some(kid),
            &directory.new_order,
            &NewOrderPayload::new(domains),
        )?;
        let order_url = location(&response, &directory.new_order)?;
        let order = Order::from_json(&response.bytes()?)?;
        debug!(order = %order_url, status = ?order.status, "created order");

        self.authorize(&directory, account, provider, &order)?;

        let certificate_key = KeyPair::generate(self.key_type)?;
        let csr = CSR::new().set_sans(domains).build(&certificate_key)?.to_der()?;
        self.post_payload(
            &directory,
            &account.key_pair,
            Some(kid),
            &order.finalize,
            &FinalizeOrderPayload::new(&csr),
        )?;

        let order = poll("order to become valid", ORDER_TIMEOUT, ORDER_POLLING_INTERVAL, || {
            let order = self.fetch_order(&directory, account, &order_url)?;
            match order.status {
                OrderStatus::Valid => Ok(Some(order)),
                OrderStatus::Invalid => Err(AcmeError::OrderFailed(
                    order
                        .error
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "order became invalid".to_string()),
                )),
                _ => Ok(None),
            }
        })?;

        let certificate_url = order
            .certificate
            .ok_or_else(|| AcmeError::OrderFailed("valid order has no certificate URL".into()))?;
        let certificate = self
            .post_as_get(&directory, account, &certificate_url, PEM_CHAIN_CONTENT_TYPE)?
            .bytes()?
            .to_vec();
        info!(url = %certificate_url, "downloaded certificate");

        Ok(IssuedCertificate {
            domain: domains.first().cloned().unwrap_or_default(),
            certificate,
            private_key: certificate_key.private_key_pem()?,
        })
    }
}

fn location(response: &Response, url: &str) -> Result<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AcmeError::MissingLocation(url.to_string()))
}

/// 錯誤回應通常是 problem document；無法解析時以原始內容作為說明。
fn parse_problem(body: &str) -> Problem {
    serde_json::from_str(body).unwrap_or_else(|_| Problem {
        problem_type: String::new(),
        detail: body.trim().to_string(),
    })
}

/// 重複呼叫 `check` 直到回傳 `Some`；錯誤立即回傳。
fn poll<T, F>(what: &str, timeout: Duration, interval: Duration, mut check: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check()? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(AcmeError::Timeout {
                what: what.to_string(),
                timeout,
            });
        }
        thread::sleep(interval);
    }
}
