//! 此模組提供 ACME 請求所用的 JSON Web Signature (JWS) 結構與簽署流程。

use std::result;

use serde::Serialize;
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
    key_pair::KeyPair,
    nonce::NonceT,
    protection::{Protection, ProtectionError, SignerId},
    signature::{create_signature, SignatureError},
};

/// 表示一個 Flattened JSON 序列化的 JWS 物件。
///
/// 各部分皆已完成 Base64 URL 安全編碼。
#[derive(Serialize, Debug)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位。
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = result::Result<T, JwsError>;

impl Jws {
    /// 以已編碼的三個部分建立 `Jws`。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 建立並簽署一個 ACME 請求主體。
    ///
    /// # 參數
    ///
    /// - `nonce`: 提供 `Replay-Nonce` 的來源。
    /// - `key_pair`: 帳戶金鑰。
    /// - `kid`: 帳戶 URL；為 `None` 時改以公鑰 `jwk` 識別（僅用於建立帳戶）。
    /// - `url`: 請求目標 URL。
    /// - `payload_b64`: 已編碼的 payload；POST-as-GET 時為空位元組。
    pub fn sign(
        nonce: &dyn NonceT,
        key_pair: &KeyPair,
        kid: Option<&str>,
        url: &str,
        payload_b64: &Base64,
    ) -> Result<Self> {
        let signer = match kid {
            Some(kid) => SignerId::Kid(kid.to_string()),
            None => SignerId::Jwk(Jwk::new(key_pair)?),
        };
        let header = Protection::new(nonce, key_pair, signer)
            .create_header(url)?
            .to_base64()?;
        let signature = create_signature(&header, payload_b64, key_pair)?;
        Ok(Self::new(&header, payload_b64, &signature))
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
