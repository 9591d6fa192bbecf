//! # certkeeper
//!
//! 單次執行的 TLS 憑證生命週期管理：判斷是否需要續約、選擇網域驗證方式、
//! 向 ACME CA（例如 Let's Encrypt）申請憑證、保存憑證、同步 DNS 記錄，
//! 並在需要時通知前端 HTTP 伺服器重新載入。
//!
//! ## 流程
//!
//! 1. **設定**（`config` 模組）：讀取 JSON 設定檔並依序驗證，任何網路或檔案操作前即拒絕無效設定。
//! 2. **DNS 同步**（`dns_updater` 模組）：伺服器未運作且有設定記錄時，將 A 記錄更新為本機公開位址。
//! 3. **續約判斷**（`renewal` 模組）：比對已保存憑證的網域與剩餘天數，剩餘天數大於 30 天時不做任何事。
//! 4. **簽發**（`client` 與 `provider` 模組）：建立並註冊帳戶，依設定與伺服器狀態選擇
//!    HTTP-01 或 DNS-01 驗證，完成授權後提交 CSR 並下載憑證。
//! 5. **保存與重新載入**（`storage` 與 `server_handler` 模組）：原子地寫入 `server.crt`
//!    與 `server.key`，伺服器仍在運作時重新載入。
//!
//! 整個流程由 [`orchestrator::Orchestrator`] 串接，各外部協作者（CA、DNS、伺服器）
//! 皆透過 trait 注入，方便以替身測試。
//!
//! ## 示例
//!
//! ```no_run
//! use certkeeper::{
//!     client::AcmeClient,
//!     config::Configuration,
//!     dns_updater::DnsUpdater,
//!     http,
//!     orchestrator::Orchestrator,
//!     server_handler::ServerHandler,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::load("/etc/certkeeper/config.json")?;
//!     let client = http::build_client()?;
//!
//!     let server = ServerHandler::from_type(config.server_handler());
//!     let dns = DnsUpdater::from_configuration(&config, &client);
//!     let mut ca = AcmeClient::new(client.clone(), config.directory_url(), config.key_type());
//!
//!     let outcome = Orchestrator::new(&config, client, &server, &dns, &mut ca).run()?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod account;
mod aws_sign;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod dns01;
pub mod dns_updater;
pub mod gandi;
pub mod http;
pub mod http01;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod orchestrator;
pub mod order;
pub mod payload;
pub mod protection;
pub mod provider;
pub mod renewal;
pub mod route53;
pub mod server_handler;
pub mod signature;
pub mod storage;
