use openssl::{
    bn::{BigNum, BigNumContext},
    pkey::Id,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// JWK相關操作的錯誤類型。
///
/// 此錯誤類型涵蓋JWK產生與序列化過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的金鑰類型。
    #[error("Unsupported key type: {0:?}")]
    UnsupportedKeyType(Id),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(#[from] openssl::error::ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，支援 RSA 與 EC 公鑰。
///
/// 以 `kty` 作為內部標籤，序列化結果可直接放入 JWS 保護頭的 `jwk` 欄位。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    /// EC 格式的 JWK。
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 格式的 JWK 結構，包含必要的公開參數。
#[derive(Debug, Clone, Serialize)]
pub struct RsaJwk {
    n: String,
    e: String,
}

/// EC 格式的 JWK 結構，座標以曲線長度補齊。
#[derive(Debug, Clone, Serialize)]
pub struct EcJwk {
    crv: &'static str,
    x: String,
    y: String,
}

impl Jwk {
    /// 根據給定的金鑰對建立對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let key = &key_pair.pri_key;
        match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    n: Base64::new(rsa.n().to_vec()).base64_url(),
                    e: Base64::new(rsa.e().to_vec()).base64_url(),
                }))
            }
            Id::EC => {
                let ec_key = key.ec_key()?;
                let group = ec_key.group();
                let (crv, size) = match key.bits() {
                    384 => ("P-384", 48),
                    _ => ("P-256", 32),
                };
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec_key
                    .public_key()
                    .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)?;
                Ok(Jwk::Ec(EcJwk {
                    crv,
                    x: Base64::new(x.to_vec_padded(size)?).base64_url(),
                    y: Base64::new(y.to_vec_padded(size)?).base64_url(),
                }))
            }
            other => Err(JwkError::UnsupportedKeyType(other)),
        }
    }

    /// 產生 RFC 7638 要求的標準 JSON 表示：只含必要成員，並依字典順序排列。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        match self {
            Jwk::Rsa(jwk) => {
                map.insert("e".to_string(), Value::String(jwk.e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(jwk.n.clone()));
            }
            Jwk::Ec(jwk) => {
                map.insert("crv".to_string(), Value::String(jwk.crv.to_string()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(jwk.x.clone()));
                map.insert("y".to_string(), Value::String(jwk.y.clone()));
            }
        }
        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}
