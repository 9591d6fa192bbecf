use serde::Serialize;
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::Jwk,
    key_pair::KeyPair,
    nonce::{NonceError, NonceT},
    signature::jws_algorithm,
};

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Nonce 相關錯誤
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 保護頭中識別簽署者的方式。
///
/// ACME 要求兩者擇一：建立帳戶時附上公鑰 `jwk`，其餘請求以帳戶 URL 作為 `kid`。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerId {
    Jwk(Jwk),
    Kid(String),
}

/// JWS 保護頭。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    alg: &'static str,
    nonce: String,
    url: String,
    #[serde(flatten)]
    signer: SignerId,
}

impl ProtectedHeader {
    pub fn to_base64(&self) -> Result<Base64> {
        let json_str = serde_json::to_string(self)?;
        Ok(Base64::new(json_str.as_bytes()))
    }
}

/// 產生保護頭：演算法由金鑰決定，每個保護頭各取一個新的 nonce。
pub struct Protection<'a> {
    nonce: &'a dyn NonceT,
    alg: &'static str,
    signer: SignerId,
}

impl<'a> Protection<'a> {
    pub fn new(nonce: &'a dyn NonceT, key_pair: &KeyPair, signer: SignerId) -> Self {
        Self {
            nonce,
            alg: jws_algorithm(key_pair),
            signer,
        }
    }

    /// 取得 nonce 並為 `url` 產生保護頭。
    pub fn create_header(&self, url: &str) -> Result<ProtectedHeader> {
        Ok(ProtectedHeader {
            alg: self.alg,
            nonce: self.nonce.get()?,
            url: url.to_string(),
            signer: self.signer.clone(),
        })
    }
}
