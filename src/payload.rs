use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::base64::Base64;

/// 定義所有 ACME 請求載荷（Payload）必須實作的功能。
///
/// 實作者需可序列化，並提供送出前的資料檢查。
pub trait PayloadT: Serialize {
    /// 將載荷轉換成 JSON 格式的字串。
    ///
    /// # 錯誤
    ///
    /// 若序列化失敗，則回傳 [`serde_json::Error`]。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 將載荷先轉換成 JSON 字串，再包裝為 [`Base64`]。
    fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合 ACME 的要求。
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 建立新帳戶所需的載荷：聯絡信箱與同意服務條款。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例。
    ///
    /// 傳入的 `email` 會自動補足 `mailto:` 前綴，若已包含則不重複補充。
    pub fn new(email: &str) -> Self {
        let contact = if email.starts_with("mailto:") {
            vec![email.to_string()]
        } else {
            vec![format!("mailto:{}", email)]
        };

        NewAccountPayload {
            contact,
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.contact.iter().any(|c| c.trim_start_matches("mailto:").is_empty()) {
            return Err("Contact information is required".into());
        }
        if !self.terms_of_service_agreed {
            return Err("Terms of service must be agreed".into());
        }
        Ok(())
    }
}

/// 訂單中的識別項，目前僅使用 `dns` 類型。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// 建立新訂單時所需的載荷，每個網域對應一個識別項，順序與設定相同。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(domains: &[String]) -> Self {
        let identifiers = domains.iter().map(Identifier::dns).collect();
        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.identifiers.is_empty() {
            return Err("At least one identifier is required".into());
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err("Identifier type must be 'dns'".into());
            }
            if identifier.value.is_empty() {
                return Err("Identifier value cannot be empty".into());
            }
        }
        Ok(())
    }
}

/// 通知 CA 開始驗證挑戰的載荷，內容為空物件 `{}`。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// 最終化訂單時所需的載荷，內含 DER 格式 CSR 的 Base64 URL 安全編碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.csr_b64_str.is_empty() {
            return Err("CSR cannot be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_payload_adds_mailto() {
        let payload = NewAccountPayload::new("admin@example.com");
        assert!(payload.validate().is_ok());
        assert_eq!(
            payload.to_json_string().unwrap(),
            r#"{"contact":["mailto:admin@example.com"],"termsOfServiceAgreed":true}"#
        );

        let already = NewAccountPayload::new("mailto:admin@example.com");
        assert_eq!(already.contact, vec!["mailto:admin@example.com"]);
    }

    #[test]
    fn test_new_order_payload_keeps_domain_order() {
        let domains = vec!["b.example.com".to_string(), "a.example.com".to_string()];
        let payload = NewOrderPayload::new(&domains);
        assert!(payload.validate().is_ok());
        assert_eq!(
            payload.to_json_string().unwrap(),
            r#"{"identifiers":[{"type":"dns","value":"b.example.com"},{"type":"dns","value":"a.example.com"}]}"#
        );
    }

    #[test]
    fn test_new_order_payload_rejects_empty() {
        assert!(NewOrderPayload::new(&[]).validate().is_err());
        assert!(NewOrderPayload::new(&[String::new()]).validate().is_err());
    }

    #[test]
    fn test_challenge_validation_payload_is_empty_object() {
        assert_eq!(
            ChallengeValidationPayload::new().to_json_string().unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_finalize_payload_uses_url_safe_encoding() {
        let payload = FinalizeOrderPayload::new(&[0xfb, 0xff, 0x01]);
        assert!(payload.validate().is_ok());
        assert_eq!(payload.to_json_string().unwrap(), r#"{"csr":"-_8B"}"#);
    }
}
