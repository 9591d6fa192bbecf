//! AWS Route53 REST API（2013-04-01），以 SigV4 簽章。

use std::time::Duration;

use chrono::Utc;
use quick_xml::escape::escape;
use reqwest::{blocking::Client, Method};
use serde::Deserialize;
use tracing::debug;

use crate::{
    aws_sign::{aws_sign_v4, canonical_query, SigningScope, UnsignedRequest},
    config::Route53Credentials,
    dns::{check_response, poll_until, zone_candidates, DnsError, DnsResult},
};

const API_VERSION: &str = "2013-04-01";
const SERVICE: &str = "route53";
const XML_NAMESPACE: &str = "https://route53.amazonaws.com/doc/2013-04-01/";

/// Route53 的記錄變更動作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Upsert,
    Delete,
}

impl ChangeAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "UPSERT",
            Self::Delete => "DELETE",
        }
    }
}

/// Route53 是全域服務，端點與簽章區域由分區決定，與設定的區域無關。
fn partition_endpoint(region: &str) -> (&'static str, &'static str) {
    if region.starts_with("cn-") {
        ("route53.amazonaws.com.cn", "cn-northwest-1")
    } else if region.starts_with("us-gov-") {
        ("route53.us-gov.amazonaws.com", "us-gov-west-1")
    } else {
        ("route53.amazonaws.com", "us-east-1")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListHostedZonesByNameResponse {
    #[serde(default)]
    hosted_zones: HostedZones,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostedZones {
    #[serde(default)]
    hosted_zone: Vec<HostedZone>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostedZone {
    id: String,
    name: String,
    #[serde(default)]
    config: Option<HostedZoneConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostedZoneConfig {
    #[serde(default)]
    private_zone: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeResponse {
    change_info: ChangeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeInfo {
    id: String,
    status: String,
}

/// Route53 客戶端。
#[derive(Clone)]
pub struct Route53Client {
    client: Client,
    access_key_id: String,
    secret_access_key: String,
    host: &'static str,
    signing_region: &'static str,
}

impl std::fmt::Debug for Route53Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route53Client")
            .field("access_key_id", &self.access_key_id)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Route53Client {
    pub fn new(client: Client, credentials: &Route53Credentials) -> Self {
        let (host, signing_region) = partition_endpoint(&credentials.region);
        Self {
            client,
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            host,
            signing_region,
        }
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
        operation: &str,
    ) -> DnsResult<String> {
        let payload = body.as_deref().unwrap_or("").as_bytes();
        let signed = aws_sign_v4(
            &UnsignedRequest {
                method: method.as_str(),
                host: self.host,
                path,
                query,
                payload,
            },
            &SigningScope {
                access_key: &self.access_key_id,
                secret_key: &self.secret_access_key,
                region: self.signing_region,
                service: SERVICE,
            },
            Utc::now(),
        )?;

        let mut url = format!("https://{}{}", self.host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query(query));
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", signed.authorization)
            .header("X-Amz-Date", signed.amz_date);
        if let Some(body) = body {
            request = request.header("Content-Type", "text/xml").body(body);
        }
        let response = check_response(request.send()?, operation)?;
        Ok(response.text()?)
    }

    /// 找出管理 `fqdn` 的公開 hosted zone，回傳不含 `/hostedzone/` 前綴的 ID。
    pub fn find_hosted_zone(&self, fqdn: &str) -> DnsResult<String> {
        let path = format!("/{}/hostedzonesbyname", API_VERSION);
        for candidate in zone_candidates(fqdn) {
            let dns_name = format!("{}.", candidate);
            let body = self.send(
                Method::GET,
                &path,
                &[("dnsname", dns_name.as_str()), ("maxitems", "1")],
                None,
                "Route53 ListHostedZonesByName",
            )?;
            if let Some(id) = match_hosted_zone(&body, candidate)? {
                debug!(fqdn, zone_id = %id, "found Route53 hosted zone");
                return Ok(id);
            }
        }
        Err(DnsError::ZoneNotFound(fqdn.to_string()))
    }

    /// 對單一記錄集送出變更，回傳 change ID。
    pub fn change_record(
        &self,
        zone_id: &str,
        action: ChangeAction,
        name: &str,
        rrtype: &str,
        ttl: u32,
        values: &[String],
    ) -> DnsResult<String> {
        let path = format!(
            "/{}/hostedzone/{}/rrset/",
            API_VERSION,
            normalize_zone_id(zone_id)
        );
        let body = change_batch_xml(action, name, rrtype, ttl, values);
        debug!(zone_id, action = action.as_str(), name, rrtype, "changing Route53 record");
        let response = self.send(
            Method::POST,
            &path,
            &[],
            Some(body),
            "Route53 ChangeResourceRecordSets",
        )?;
        let change: ChangeResponse = quick_xml::de::from_str(&response)?;
        Ok(change.change_info.id)
    }

    fn change_status(&self, change_id: &str) -> DnsResult<String> {
        let id = change_id.trim_start_matches("/change/");
        let path = format!("/{}/change/{}", API_VERSION, id);
        let response = self.send(Method::GET, &path, &[], None, "Route53 GetChange")?;
        let change: ChangeResponse = quick_xml::de::from_str(&response)?;
        Ok(change.change_info.status)
    }

    /// 等待變更狀態成為 `INSYNC`。
    pub fn wait_for_change(
        &self,
        change_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> DnsResult<()> {
        poll_until(
            &format!("Route53 change {}", change_id),
            timeout,
            interval,
            || Ok(self.change_status(change_id)? == "INSYNC"),
        )
    }
}

/// `/hostedzone/Z123` 與 `Z123` 皆轉為 `Z123`。
fn normalize_zone_id(zone_id: &str) -> &str {
    zone_id.trim_start_matches("/hostedzone/")
}

fn match_hosted_zone(body: &str, candidate: &str) -> DnsResult<Option<String>> {
    let response: ListHostedZonesByNameResponse = quick_xml::de::from_str(body)?;
    Ok(response
        .hosted_zones
        .hosted_zone
        .into_iter()
        .find(|zone| {
            zone.name.trim_end_matches('.') == candidate
                && !zone.config.as_ref().is_some_and(|c| c.private_zone)
        })
        .map(|zone| normalize_zone_id(&zone.id).to_string()))
}

fn change_batch_xml(
    action: ChangeAction,
    name: &str,
    rrtype: &str,
    ttl: u32,
    values: &[String],
) -> String {
    let records: String = values
        .iter()
        .map(|v| format!("<ResourceRecord><Value>{}</Value></ResourceRecord>", escape(v.as_str())))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <ChangeResourceRecordSetsRequest xmlns=\"{XML_NAMESPACE}\">\
         <ChangeBatch><Changes><Change>\
         <Action>{}</Action>\
         <ResourceRecordSet>\
         <Name>{}</Name><Type>{}</Type><TTL>{}</TTL>\
         <ResourceRecords>{}</ResourceRecords>\
         </ResourceRecordSet>\
         </Change></Changes></ChangeBatch>\
         </ChangeResourceRecordSetsRequest>",
        action.as_str(),
        escape(name),
        rrtype,
        ttl,
        records,
    )
}

/// Route53 的 TXT 值必須以雙引號包住。
pub fn quote_txt(value: &str) -> String {
    format!("\"{}\"", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_endpoint() {
        assert_eq!(
            partition_endpoint("eu-west-1"),
            ("route53.amazonaws.com", "us-east-1")
        );
        assert_eq!(
            partition_endpoint("cn-north-1"),
            ("route53.amazonaws.com.cn", "cn-northwest-1")
        );
        assert_eq!(
            partition_endpoint("us-gov-east-1"),
            ("route53.us-gov.amazonaws.com", "us-gov-west-1")
        );
    }

    #[test]
    fn test_change_batch_xml() {
        let xml = change_batch_xml(
            ChangeAction::Upsert,
            "_acme-challenge.example.com",
            "TXT",
            10,
            &[quote_txt("abc")],
        );
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><ChangeResourceRecordSetsRequest"));
        assert!(xml.contains("<Action>UPSERT</Action>"));
        assert!(xml.contains("<Name>_acme-challenge.example.com</Name><Type>TXT</Type><TTL>10</TTL>"));
        assert!(xml.contains("<Value>&quot;abc&quot;</Value>"));
    }

    #[test]
    fn test_match_hosted_zone() {
        let body = r#"<?xml version="1.0"?>
<ListHostedZonesByNameResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <HostedZones>
    <HostedZone>
      <Id>/hostedzone/Z0123456789</Id>
      <Name>example.com.</Name>
      <CallerReference>ref</CallerReference>
      <Config><PrivateZone>false</PrivateZone></Config>
      <ResourceRecordSetCount>4</ResourceRecordSetCount>
    </HostedZone>
  </HostedZones>
  <DNSName>example.com.</DNSName>
  <IsTruncated>false</IsTruncated>
  <MaxItems>1</MaxItems>
</ListHostedZonesByNameResponse>"#;
        assert_eq!(
            match_hosted_zone(body, "example.com").unwrap().as_deref(),
            Some("Z0123456789")
        );
        // 依名稱排序時回傳的可能是下一個 zone
        assert!(match_hosted_zone(body, "www.example.com").unwrap().is_none());
    }

    #[test]
    fn test_match_hosted_zone_skips_private() {
        let body = r#"<ListHostedZonesByNameResponse>
  <HostedZones>
    <HostedZone>
      <Id>/hostedzone/ZPRIVATE</Id>
      <Name>example.com.</Name>
      <Config><PrivateZone>true</PrivateZone></Config>
    </HostedZone>
  </HostedZones>
</ListHostedZonesByNameResponse>"#;
        assert!(match_hosted_zone(body, "example.com").unwrap().is_none());
    }

    #[test]
    fn test_parse_change_response() {
        let body = r#"<?xml version="1.0"?>
<ChangeResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ChangeInfo>
    <Id>/change/C2682N5HXP0BZ4</Id>
    <Status>PENDING</Status>
    <SubmittedAt>2026-10-16T10:00:00.000Z</SubmittedAt>
  </ChangeInfo>
</ChangeResourceRecordSetsResponse>"#;
        let change: ChangeResponse = quick_xml::de::from_str(body).unwrap();
        assert_eq!(change.change_info.id, "/change/C2682N5HXP0BZ4");
        assert_eq!(change.change_info.status, "PENDING");
    }

    #[test]
    fn test_normalize_zone_id() {
        assert_eq!(normalize_zone_id("/hostedzone/Z1"), "Z1");
        assert_eq!(normalize_zone_id("Z1"), "Z1");
    }
}
