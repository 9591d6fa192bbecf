//! 讓設定中的 A 記錄指向本機目前的公開 IPv4 位址。

use std::net::Ipv4Addr;

use reqwest::blocking::Client;
use tracing::info;

use crate::{
    config::{Configuration, DnsRecord, ProviderType},
    dns::{AddressDiscovery, DnsResult, IfconfigMe},
    gandi::GandiClient,
    route53::{ChangeAction, Route53Client},
};

pub const GANDI_RECORD_TTL: u32 = 300;
pub const ROUTE53_RECORD_TTL: u32 = 60;

/// 更新 DNS 記錄的介面。
pub trait DnsUpdate {
    fn update(&self) -> DnsResult<()>;
}

#[derive(Debug, Clone)]
pub enum DnsUpdater {
    /// 未使用 DNS 供應商：不做任何事。
    Null,
    Gandi {
        client: GandiClient,
        discovery: IfconfigMe,
        records: Vec<DnsRecord>,
    },
    Route53 {
        client: Route53Client,
        hosted_zone_id: Option<String>,
        discovery: IfconfigMe,
        records: Vec<DnsRecord>,
    },
}

impl DnsUpdater {
    /// 依驗證方式決定使用的 DNS 供應商；HTTP 驗證時為 [`DnsUpdater::Null`]。
    pub fn from_configuration(config: &Configuration, client: &Client) -> Self {
        let records = config.dns_records().to_vec();
        let discovery = IfconfigMe::new(client.clone());
        match config.provider() {
            ProviderType::Http | ProviderType::HttpReverseProxy => Self::Null,
            ProviderType::Gandi(credentials) => Self::Gandi {
                client: GandiClient::new(client.clone(), &credentials.api_key),
                discovery,
                records,
            },
            ProviderType::Route53(credentials) => Self::Route53 {
                client: Route53Client::new(client.clone(), credentials),
                hosted_zone_id: credentials.hosted_zone_id.clone(),
                discovery,
                records,
            },
        }
    }
}

impl DnsUpdate for DnsUpdater {
    fn update(&self) -> DnsResult<()> {
        match self {
            Self::Null => Ok(()),
            Self::Gandi {
                client,
                discovery,
                records,
            } => update_records(discovery, records, |record, address| {
                client.put_record(
                    &record.domain,
                    gandi_record_name(record),
                    "A",
                    GANDI_RECORD_TTL,
                    &[address.to_string()],
                )
            }),
            Self::Route53 {
                client,
                hosted_zone_id,
                discovery,
                records,
            } => update_records(discovery, records, |record, address| {
                let fqdn = record.fqdn();
                let zone_id = match hosted_zone_id {
                    Some(id) => id.clone(),
                    None => client.find_hosted_zone(&fqdn)?,
                };
                client.change_record(
                    &zone_id,
                    ChangeAction::Upsert,
                    &fqdn,
                    "A",
                    ROUTE53_RECORD_TTL,
                    &[address.to_string()],
                )?;
                Ok(())
            }),
        }
    }
}

fn gandi_record_name(record: &DnsRecord) -> &str {
    if record.name.is_empty() {
        "@"
    } else {
        &record.name
    }
}

/// 查詢一次公開位址後依序更新每筆記錄，第一個失敗即中止。
fn update_records<F>(
    discovery: &dyn AddressDiscovery,
    records: &[DnsRecord],
    mut upsert: F,
) -> DnsResult<()>
where
    F: FnMut(&DnsRecord, Ipv4Addr) -> DnsResult<()>,
{
    if records.is_empty() {
        return Ok(());
    }
    let address = discovery.public_ipv4()?;
    for record in records {
        upsert(record, address)?;
        info!(record = %record, %address, "updated DNS record");
    }
    Ok(())
}
