use openssl::sha::sha256;
use serde::Deserialize;

use crate::{base64::Base64, order::Problem, payload::Identifier};

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// 根據字串返回對應的挑戰類型，若不支援則返回 `None`。
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "http-01" => Some(Self::Http01),
            "dns-01" => Some(Self::Dns01),
            "tls-alpn-01" => Some(Self::TlsAlpn01),
            _ => None,
        }
    }

    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

/// 挑戰與授權共用的狀態值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl ChallengeStatus {
    /// 判斷該狀態是否為失敗的終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Invalid | Self::Deactivated | Self::Expired | Self::Revoked
        )
    }

    /// 返回狀態對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

/// 一個 ACME 驗證挑戰。
#[derive(Debug, Clone)]
pub struct Challenge {
    /// 驗證挑戰的類型
    pub challenge_type: ChallengeType,
    /// 驗證挑戰的 URL
    pub url: String,
    /// 挑戰 token，用於生成 key authorization
    pub token: String,
    /// 當前挑戰狀態
    pub status: ChallengeStatus,
    /// 驗證失敗時 CA 回報的原因
    pub error: Option<Problem>,
}

impl Challenge {
    /// 以帳戶金鑰的 thumbprint 組成 key authorization。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        key_authorization(&self.token, thumbprint)
    }
}

/// `token.thumbprint`，HTTP-01 回應的內容即為此字串。
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}

/// 根據 key authorization 計算 DNS TXT 記錄值，使用 SHA-256 與 URL-safe Base64 編碼。
pub fn dns_txt_value(key_authorization: &str) -> String {
    Base64::new(sha256(key_authorization.as_bytes())).base64_url()
}

#[derive(Deserialize)]
struct ChallengeResponse {
    #[serde(rename = "type")]
    challenge_type: String,
    url: String,
    status: ChallengeStatus,
    #[serde(default)]
    token: String,
    #[serde(default)]
    error: Option<Problem>,
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    identifier: Identifier,
    status: ChallengeStatus,
    challenges: Vec<ChallengeResponse>,
    #[serde(default)]
    wildcard: bool,
}

/// 授權物件：一個網域識別項與 CA 提供的挑戰清單。
#[derive(Debug, Clone)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: ChallengeStatus,
    /// 僅包含本程式認得的挑戰類型。
    pub challenges: Vec<Challenge>,
    pub wildcard: bool,
}

impl Authorization {
    /// 從授權物件的 JSON 內容解析。
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        let response: AuthorizationResponse = serde_json::from_slice(json)?;

        let challenges = response
            .challenges
            .into_iter()
            .filter_map(|resp| {
                let challenge_type = ChallengeType::from_str(&resp.challenge_type)?;
                Some(Challenge {
                    challenge_type,
                    url: resp.url,
                    token: resp.token,
                    status: resp.status,
                    error: resp.error,
                })
            })
            .collect();

        Ok(Authorization {
            identifier: response.identifier,
            status: response.status,
            challenges,
            wildcard: response.wildcard,
        })
    }

    /// 驗證目標網域；萬用字元授權的識別項不含 `*.`，此處補回。
    pub fn domain(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    /// 找出指定類型的挑戰。
    pub fn challenge(&self, challenge_type: ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type)
    }

    /// 第一個帶有錯誤說明的挑戰，用於回報驗證失敗原因。
    pub fn failure(&self) -> Option<&Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}
