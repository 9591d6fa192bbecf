//! Gandi LiveDNS v5 API。

use reqwest::{blocking::Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::dns::{check_response, zone_candidates, DnsError, DnsResult};

/// Gandi LiveDNS API base URL
pub const GANDI_API_BASE: &str = "https://dns.api.gandi.net/api/v5";

#[derive(Debug, Serialize)]
struct RecordUpdateRequest<'a> {
    rrset_ttl: u32,
    rrset_values: &'a [String],
}

/// Gandi LiveDNS 客戶端。
#[derive(Clone)]
pub struct GandiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GandiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GandiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GandiClient {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: GANDI_API_BASE.to_string(),
        }
    }

    fn record_url(&self, domain: &str, name: &str, rrtype: &str) -> String {
        format!(
            "{}/domains/{}/records/{}/{}",
            self.base_url, domain, name, rrtype
        )
    }

    /// 找出管理 `fqdn` 的 zone：由完整名稱往上逐層嘗試 `GET /domains/{zone}`。
    pub fn find_zone(&self, fqdn: &str) -> DnsResult<String> {
        for candidate in zone_candidates(fqdn) {
            let response = self
                .client
                .get(format!("{}/domains/{}", self.base_url, candidate))
                .header("X-Api-Key", &self.api_key)
                .send()?;
            match response.status() {
                status if status.is_success() => {
                    debug!(fqdn, zone = candidate, "found Gandi zone");
                    return Ok(candidate.to_string());
                }
                StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => continue,
                _ => {
                    check_response(response, "Gandi zone lookup")?;
                }
            }
        }
        Err(DnsError::ZoneNotFound(fqdn.to_string()))
    }

    /// 以 `PUT` 取代整組記錄值。
    pub fn put_record(
        &self,
        domain: &str,
        name: &str,
        rrtype: &str,
        ttl: u32,
        values: &[String],
    ) -> DnsResult<()> {
        let url = self.record_url(domain, name, rrtype);
        debug!(%url, ttl, "updating Gandi record");
        let response = self
            .client
            .put(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&RecordUpdateRequest {
                rrset_ttl: ttl,
                rrset_values: values,
            })
            .send()?;
        check_response(response, "Gandi record update")?;
        Ok(())
    }

    /// 刪除整組記錄；記錄不存在時視為成功。
    pub fn delete_record(&self, domain: &str, name: &str, rrtype: &str) -> DnsResult<()> {
        let url = self.record_url(domain, name, rrtype);
        debug!(%url, "deleting Gandi record");
        let response = self
            .client
            .delete(&url)
            .header("X-Api-Key", &self.api_key)
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_response(response, "Gandi record deletion")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_url() {
        let gandi = GandiClient::new(Client::new(), "secret");
        assert_eq!(
            gandi.record_url("example.com", "www", "A"),
            "https://dns.api.gandi.net/api/v5/domains/example.com/records/www/A"
        );
    }

    #[test]
    fn test_update_request_body() {
        let values = vec!["203.0.113.7".to_string()];
        let body = serde_json::to_string(&RecordUpdateRequest {
            rrset_ttl: 300,
            rrset_values: &values,
        })
        .unwrap();
        assert_eq!(body, r#"{"rrset_ttl":300,"rrset_values":["203.0.113.7"]}"#);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let gandi = GandiClient::new(Client::new(), "super-secret");
        assert!(!format!("{:?}", gandi).contains("super-secret"));
    }
}
