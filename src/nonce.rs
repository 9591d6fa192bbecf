//! ACME 請求使用的防重放 nonce。
//!
//! 伺服器在每個回應中都附上一個新的 `Replay-Nonce`，保存下來即可供下一個請求使用，
//! 沒有可用的 nonce 時才向 `newNonce` 發送 HEAD 請求。

use std::cell::RefCell;

use reqwest::{blocking::Client, header::HeaderMap};
use thiserror::Error;

pub const REPLAY_NONCE: &str = "Replay-Nonce";

#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::ToStrError),
}

/// 取得下一個 nonce 的來源。
pub trait NonceT {
    fn get(&self) -> Result<String, NonceError>;
}

#[derive(Debug, Clone)]
pub struct Nonce {
    client: Client,
    url: String,
    cached: RefCell<Option<String>>,
}

impl Nonce {
    /// `url` 為目錄中的 `newNonce`。
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Nonce {
            client,
            url: url.into(),
            cached: RefCell::new(None),
        }
    }

    /// 以先前回應留下的 nonce 起始。
    pub fn with_cached(self, nonce: Option<String>) -> Self {
        self.cached.replace(nonce);
        self
    }

    /// 保存回應附帶的 nonce；沒有時保留原值。
    pub fn remember(&self, headers: &HeaderMap) {
        if let Ok(nonce) = read_replay_nonce(headers) {
            self.cached.replace(Some(nonce));
        }
    }

    /// 取出尚未使用的 nonce。
    pub fn take_cached(&self) -> Option<String> {
        self.cached.take()
    }
}

impl NonceT for Nonce {
    fn get(&self) -> Result<String, NonceError> {
        if let Some(nonce) = self.cached.take() {
            return Ok(nonce);
        }
        let response = self.client.head(&self.url).send()?;
        read_replay_nonce(response.headers())
    }
}

fn read_replay_nonce(headers: &HeaderMap) -> Result<String, NonceError> {
    match headers.get(REPLAY_NONCE) {
        Some(nonce) => Ok(nonce.to_str()?.to_string()),
        None => Err(NonceError::NoNonceHeader),
    }
}

/// 提供固定值的 Nonce，供測試簽署流程使用。
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

#[cfg(test)]
impl MockNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[cfg(test)]
impl NonceT for MockNonce {
    fn get(&self) -> Result<String, NonceError> {
        Ok(self.value.clone())
    }
}
