use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

/// 表示取得目錄時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    /// 目錄伺服器回應非成功狀態碼。
    #[error("Directory request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
}

/// 簡化目錄操作結果的型別。
type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// ACME 目錄，列出帳戶、nonce 與訂單相關的端點。
#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於建立訂單的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revokeCert", default)]
    pub revoke_cert: Option<String>,
}

impl Directory {
    /// 從指定 URL 取得 `Directory`。
    ///
    /// 每次執行都重新取得，不做快取。
    pub fn fetch(client: &Client, url: &str) -> DirectoryResult<Self> {
        let response = client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_deserialization() {
        let json = r#"{
            "keyChange": "https://ca.example/acme/key-change",
            "meta": {"termsOfService": "https://ca.example/tos"},
            "newAccount": "https://ca.example/acme/new-acct",
            "newNonce": "https://ca.example/acme/new-nonce",
            "newOrder": "https://ca.example/acme/new-order",
            "revokeCert": "https://ca.example/acme/revoke-cert"
        }"#;
        let directory: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(directory.new_account, "https://ca.example/acme/new-acct");
        assert_eq!(directory.new_nonce, "https://ca.example/acme/new-nonce");
        assert_eq!(directory.new_order, "https://ca.example/acme/new-order");
        assert_eq!(
            directory.revoke_cert.as_deref(),
            Some("https://ca.example/acme/revoke-cert")
        );
    }

    #[test]
    fn test_directory_without_optional_fields() {
        let json = r#"{
            "newAccount": "a",
            "newNonce": "n",
            "newOrder": "o"
        }"#;
        let directory: Directory = serde_json::from_str(json).unwrap();
        assert!(directory.revoke_cert.is_none());
    }
}
