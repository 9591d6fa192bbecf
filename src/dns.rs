//! DNS 相關的共用元件：錯誤型別、公開位址查詢、TXT 記錄傳播檢查。

use std::{
    net::Ipv4Addr,
    thread,
    time::{Duration, Instant},
};

use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// DNS-01 挑戰記錄的前綴。
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// 查詢本機公開 IPv4 位址的服務。
pub const ADDRESS_DISCOVERY_URL: &str = "https://ifconfig.me/ip";

/// 用來確認 TXT 記錄是否已傳播的 DNS-over-HTTPS 端點。
pub const DOH_RESOLVER_URL: &str = "https://dns.google/resolve";

const TXT_RECORD_TYPE: u16 = 16;

/// DNS 供應商操作的錯誤。
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{operation} failed: HTTP {status} - {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("Zone not found for domain '{0}'")]
    ZoneNotFound(String),
    #[error("Address discovery returned an invalid IPv4 address: '{0}'")]
    InvalidAddress(String),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("Request signing failed: {0}")]
    Signing(#[from] openssl::error::ErrorStack),
    #[error("{what} not ready after {}s", .timeout.as_secs())]
    Timeout { what: String, timeout: Duration },
}

pub type DnsResult<T> = Result<T, DnsError>;

/// 非成功狀態碼轉為 [`DnsError::Api`]，保留回應內容方便除錯。
pub(crate) fn check_response(response: Response, operation: &str) -> DnsResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(DnsError::Api {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// 去掉萬用字元前綴，得到實際要驗證的網域。
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// `example.com` 與 `*.example.com` 皆對應 `_acme-challenge.example.com`。
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

/// 由 FQDN 往上逐層列出可能的 zone，例如 `a.b.example.com` 依序得到
/// `a.b.example.com`、`b.example.com`、`example.com`。
pub fn zone_candidates(fqdn: &str) -> Vec<&str> {
    let fqdn = fqdn.trim_end_matches('.');
    let mut candidates = Vec::new();
    let mut current = fqdn;
    while current.contains('.') {
        candidates.push(current);
        match current.find('.') {
            Some(pos) => current = &current[pos + 1..],
            None => break,
        }
    }
    candidates
}

/// 記錄名稱相對於 zone 的部分；與 zone 相同時為 `@`。
pub fn relative_record_name(fqdn: &str, zone: &str) -> String {
    let fqdn = fqdn.trim_end_matches('.');
    let zone = zone.trim_end_matches('.');
    if fqdn == zone {
        "@".to_string()
    } else if let Some(stripped) = fqdn.strip_suffix(&format!(".{}", zone)) {
        stripped.to_string()
    } else {
        fqdn.to_string()
    }
}

/// 以固定間隔重複檢查，直到條件成立或逾時。
///
/// 檢查出錯時記錄警告並繼續等待，逾時回傳 [`DnsError::Timeout`]。
pub fn poll_until<F>(what: &str, timeout: Duration, interval: Duration, mut check: F) -> DnsResult<()>
where
    F: FnMut() -> DnsResult<bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        match check() {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(what, "not ready yet"),
            Err(e) => warn!(what, error = %e, "check failed"),
        }
        if Instant::now() >= deadline {
            return Err(DnsError::Timeout {
                what: what.to_string(),
                timeout,
            });
        }
        thread::sleep(interval);
    }
}

/// 查詢本機對外的 IPv4 位址。
pub trait AddressDiscovery {
    fn public_ipv4(&self) -> DnsResult<Ipv4Addr>;
}

/// 以 `ifconfig.me` 查詢公開位址。
#[derive(Debug, Clone)]
pub struct IfconfigMe {
    client: Client,
    url: String,
}

impl IfconfigMe {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            url: ADDRESS_DISCOVERY_URL.to_string(),
        }
    }
}

impl AddressDiscovery for IfconfigMe {
    fn public_ipv4(&self) -> DnsResult<Ipv4Addr> {
        let response = check_response(self.client.get(&self.url).send()?, "address discovery")?;
        let address = parse_ipv4(&response.text()?)?;
        debug!(%address, "discovered public address");
        Ok(address)
    }
}

/// 解析位址查詢服務的回應內容。
pub fn parse_ipv4(body: &str) -> DnsResult<Ipv4Addr> {
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| DnsError::InvalidAddress(trimmed.to_string()))
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// 透過 DNS-over-HTTPS 檢查 TXT 記錄是否已經對外可見。
#[derive(Debug, Clone)]
pub struct PropagationChecker {
    client: Client,
    resolver_url: String,
}

impl PropagationChecker {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolver_url: DOH_RESOLVER_URL.to_string(),
        }
    }

    /// 目前解析到的所有 TXT 值。
    pub fn txt_values(&self, fqdn: &str) -> DnsResult<Vec<String>> {
        let response = self
            .client
            .get(&self.resolver_url)
            .query(&[("name", fqdn), ("type", "TXT")])
            .send()?;
        let response = check_response(response, "DNS-over-HTTPS lookup")?;
        Ok(parse_txt_answers(&response.bytes()?))
    }

    /// 等待 `fqdn` 的 TXT 記錄出現 `expected`。
    pub fn wait_for_txt(
        &self,
        fqdn: &str,
        expected: &str,
        timeout: Duration,
        interval: Duration,
    ) -> DnsResult<()> {
        debug!(
            record = %fqdn,
            timeout_secs = timeout.as_secs(),
            "waiting for DNS propagation"
        );
        poll_until(&format!("TXT record {}", fqdn), timeout, interval, || {
            Ok(self.txt_values(fqdn)?.iter().any(|v| v == expected))
        })
    }
}

/// 解析 DoH JSON 回應中的 TXT 值，去除引號並接合分段字串。
fn parse_txt_answers(body: &[u8]) -> Vec<String> {
    let Ok(response) = serde_json::from_slice::<DohResponse>(body) else {
        return Vec::new();
    };
    response
        .answer
        .into_iter()
        .filter(|a| a.record_type == TXT_RECORD_TYPE)
        .map(|a| a.data.replace("\" \"", "").trim_matches('"').to_string())
        .collect()
}
