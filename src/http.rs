//! 共用的 HTTP 客戶端設定。

use std::time::Duration;

use reqwest::blocking::Client;

/// 建立連線的逾時。
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// 單一請求（含讀取回應）的總逾時。
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// 所有對外請求帶上的 User-Agent。
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// 建立本次執行共用的客戶端。
pub fn build_client() -> reqwest::Result<Client> {
    build_client_with_timeout(REQUEST_TIMEOUT)
}

/// 以指定的總逾時建立客戶端，連線逾時固定為 [`CONNECT_TIMEOUT`]。
pub fn build_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}
