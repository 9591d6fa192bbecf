use crate::{base64::Base64, config::KeyType, key_pair::KeyPair};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::sign::Signer;
use std::error::Error;

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    SigningError(String),
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureError::SigningError(msg) => write!(f, "Signing error: {}", msg),
        }
    }
}

impl From<openssl::error::ErrorStack> for SignatureError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        SignatureError::SigningError(e.to_string())
    }
}

impl Error for SignatureError {}

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// JWS 保護頭中 `alg` 欄位的值。
    fn jws_name(&self) -> &'static str;

    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 格式的簽名位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RSASSA-PKCS1-v1_5 with SHA-256。
struct RSASignature;

impl SignatureAlgorithmT for RSASignature {
    fn jws_name(&self) -> &'static str {
        "RS256"
    }

    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.set_rsa_padding(openssl::rsa::Padding::PKCS1)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ECDSA 簽名；JWS 要求 `r || s` 的固定長度串接，而非 DER。
struct ECDSASignature {
    name: &'static str,
    digest: MessageDigest,
    component_len: i32,
}

impl SignatureAlgorithmT for ECDSASignature {
    fn jws_name(&self) -> &'static str {
        self.name
    }

    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let digest = hash(self.digest, data)?;
        let sig = EcdsaSig::sign(&digest, key_pair.pri_key.ec_key()?.as_ref())?;
        let mut out = sig.r().to_vec_padded(self.component_len)?;
        out.extend(sig.s().to_vec_padded(self.component_len)?);
        Ok(out)
    }
}

/// 根據金鑰類型取得對應的簽名演算法實作。
fn algorithm_for(key_type: KeyType) -> Box<dyn SignatureAlgorithmT> {
    match key_type {
        KeyType::P256 => Box::new(ECDSASignature {
            name: "ES256",
            digest: MessageDigest::sha256(),
            component_len: 32,
        }),
        KeyType::P384 => Box::new(ECDSASignature {
            name: "ES384",
            digest: MessageDigest::sha384(),
            component_len: 48,
        }),
        KeyType::Rsa2048 | KeyType::Rsa4096 | KeyType::Rsa8192 => Box::new(RSASignature),
    }
}

/// 金鑰對應的 JWS `alg` 名稱。
pub fn jws_algorithm(key_pair: &KeyPair) -> &'static str {
    algorithm_for(key_pair.key_type).jws_name()
}

/// 根據提供的 header、payload 與金鑰對，生成對應的簽名。
///
/// 簽名輸入為 `BASE64URL(header) || '.' || BASE64URL(payload)`。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = format!("{}.{}", header_b64.base64_url(), payload_b64.base64_url());
    let algorithm = algorithm_for(key_pair.key_type);

    let signature = algorithm.sign(signing_input.as_bytes(), key_pair)?;

    Ok(Base64::new(&signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::{bn::BigNum, sign::Verifier};

    #[test]
    fn test_algorithm_names() {
        assert_eq!(
            jws_algorithm(&KeyPair::generate(KeyType::P256).unwrap()),
            "ES256"
        );
        assert_eq!(
            jws_algorithm(&KeyPair::generate(KeyType::P384).unwrap()),
            "ES384"
        );
        assert_eq!(
            jws_algorithm(&KeyPair::generate(KeyType::Rsa2048).unwrap()),
            "RS256"
        );
    }

    #[test]
    fn test_ecdsa_signature_verifies() {
        let key_pair = KeyPair::generate(KeyType::P256).unwrap();
        let header = Base64::new(r#"{"alg":"ES256"}"#);
        let payload = Base64::new(r#"{"hello":"world"}"#);
        let signature = create_signature(&header, &payload, &key_pair).unwrap();
        let raw = signature.as_bytes();
        assert_eq!(raw.len(), 64);

        let r = BigNum::from_slice(&raw[..32]).unwrap();
        let s = BigNum::from_slice(&raw[32..]).unwrap();
        let sig = EcdsaSig::from_private_components(r, s).unwrap();
        let input = format!("{}.{}", header.base64_url(), payload.base64_url());
        let digest = hash(MessageDigest::sha256(), input.as_bytes()).unwrap();
        let ec_key = key_pair.pri_key.ec_key().unwrap();
        assert!(sig.verify(&digest, &ec_key).unwrap());
    }

    #[test]
    fn test_rsa_signature_verifies() {
        let key_pair = KeyPair::generate(KeyType::Rsa2048).unwrap();
        let header = Base64::new("header");
        let payload = Base64::new("");
        let signature = create_signature(&header, &payload, &key_pair).unwrap();

        let input = format!("{}.", header.base64_url());
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key_pair.pri_key).unwrap();
        verifier.update(input.as_bytes()).unwrap();
        assert!(verifier.verify(signature.as_bytes()).unwrap());
    }
}
