//! ACME 帳戶。
//!
//! 每次需要簽發時都以新的金鑰建立帳戶並重新註冊，不保存帳戶資料。

use crate::{
    config::KeyType,
    key_pair::{KeyError, KeyPair},
};

/// CA 註冊成功後回傳的帳戶資訊。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// 帳戶 URL，之後的請求以此作為 JWS 的 `kid`。
    pub url: String,
}

/// 表示 ACME 帳戶，包含聯絡信箱、簽署金鑰與註冊結果。
#[derive(Debug)]
pub struct Account {
    /// 帳戶所屬電子郵件地址。
    pub email: String,
    /// 註冊成功前為 `None`。
    pub registration: Option<Registration>,
    /// 帳戶使用的簽署金鑰。
    pub key_pair: KeyPair,
}

impl Account {
    /// 以指定的金鑰類型產生新金鑰並建立尚未註冊的帳戶。
    pub fn new(email: &str, key_type: KeyType) -> Result<Self, KeyError> {
        Ok(Account {
            email: email.to_string(),
            registration: None,
            key_pair: KeyPair::generate(key_type)?,
        })
    }

    /// 已註冊時回傳帳戶 URL。
    pub fn kid(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.url.as_str())
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }
}
