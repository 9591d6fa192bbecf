//! DNS-01 挑戰供應商：在 `_acme-challenge.<domain>` 發布 TXT 記錄，並在驗證後移除。

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::{
    config::{GandiCredentials, Route53Credentials},
    dns::{challenge_record_fqdn, relative_record_name, DnsResult, PropagationChecker},
    gandi::GandiClient,
    route53::{quote_txt, ChangeAction, Route53Client},
};

pub const GANDI_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub const GANDI_POLLING_INTERVAL: Duration = Duration::from_secs(20);
pub const GANDI_TTL: u32 = 300;

pub const ROUTE53_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const ROUTE53_POLLING_INTERVAL: Duration = Duration::from_secs(4);
pub const ROUTE53_TTL: u32 = 10;

/// Gandi LiveDNS 上的 DNS-01 供應商。
#[derive(Debug, Clone)]
pub struct GandiDns01 {
    client: GandiClient,
}

/// Route53 上的 DNS-01 供應商。
#[derive(Debug, Clone)]
pub struct Route53Dns01 {
    client: Route53Client,
    hosted_zone_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Dns01Backend {
    Gandi(GandiDns01),
    Route53(Route53Dns01),
}

/// 已綁定憑證的 DNS-01 供應商，連同傳播檢查設定。
#[derive(Debug, Clone)]
pub struct Dns01Provider {
    backend: Dns01Backend,
    checker: PropagationChecker,
}

impl Dns01Provider {
    /// `api_client` 用於 Gandi API，`resolver_client` 用於傳播檢查。
    pub fn gandi(credentials: &GandiCredentials, api_client: Client, resolver_client: Client) -> Self {
        Self {
            backend: Dns01Backend::Gandi(GandiDns01 {
                client: GandiClient::new(api_client, &credentials.api_key),
            }),
            checker: PropagationChecker::new(resolver_client),
        }
    }

    pub fn route53(credentials: &Route53Credentials, client: Client) -> Self {
        Self {
            backend: Dns01Backend::Route53(Route53Dns01 {
                client: Route53Client::new(client.clone(), credentials),
                hosted_zone_id: credentials.hosted_zone_id.clone(),
            }),
            checker: PropagationChecker::new(client),
        }
    }

    pub fn backend(&self) -> &Dns01Backend {
        &self.backend
    }

    pub fn name(&self) -> &'static str {
        match self.backend {
            Dns01Backend::Gandi(_) => "gandi",
            Dns01Backend::Route53(_) => "route53",
        }
    }

    /// 等待 TXT 記錄傳播的上限。
    pub fn propagation_timeout(&self) -> Duration {
        match self.backend {
            Dns01Backend::Gandi(_) => GANDI_PROPAGATION_TIMEOUT,
            Dns01Backend::Route53(_) => ROUTE53_PROPAGATION_TIMEOUT,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        match self.backend {
            Dns01Backend::Gandi(_) => GANDI_POLLING_INTERVAL,
            Dns01Backend::Route53(_) => ROUTE53_POLLING_INTERVAL,
        }
    }

    /// TXT 記錄的 TTL。
    fn ttl(&self) -> u32 {
        match self.backend {
            Dns01Backend::Gandi(_) => GANDI_TTL,
            Dns01Backend::Route53(_) => ROUTE53_TTL,
        }
    }

    /// 發布 TXT 記錄並等待其對外可見。
    pub fn present(&self, domain: &str, value: &str) -> DnsResult<()> {
        let fqdn = challenge_record_fqdn(domain);
        info!(provider = self.name(), record = %fqdn, "publishing DNS-01 TXT record");
        match &self.backend {
            Dns01Backend::Gandi(gandi) => {
                let zone = gandi.client.find_zone(&fqdn)?;
                let name = relative_record_name(&fqdn, &zone);
                gandi
                    .client
                    .put_record(&zone, &name, "TXT", self.ttl(), &[value.to_string()])?;
            }
            Dns01Backend::Route53(route53) => {
                let zone_id = route53.zone_id(&fqdn)?;
                let change_id = route53.client.change_record(
                    &zone_id,
                    ChangeAction::Upsert,
                    &fqdn,
                    "TXT",
                    self.ttl(),
                    &[quote_txt(value)],
                )?;
                route53.client.wait_for_change(
                    &change_id,
                    ROUTE53_PROPAGATION_TIMEOUT,
                    ROUTE53_POLLING_INTERVAL,
                )?;
            }
        }
        self.checker.wait_for_txt(
            &fqdn,
            value,
            self.propagation_timeout(),
            self.polling_interval(),
        )?;
        debug!(record = %fqdn, "DNS-01 TXT record propagated");
        Ok(())
    }

    /// 移除先前發布的 TXT 記錄。
    pub fn cleanup(&self, domain: &str, value: &str) -> DnsResult<()> {
        let fqdn = challenge_record_fqdn(domain);
        debug!(provider = self.name(), record = %fqdn, "removing DNS-01 TXT record");
        match &self.backend {
            Dns01Backend::Gandi(gandi) => {
                let zone = gandi.client.find_zone(&fqdn)?;
                let name = relative_record_name(&fqdn, &zone);
                gandi.client.delete_record(&zone, &name, "TXT")
            }
            Dns01Backend::Route53(route53) => {
                let zone_id = route53.zone_id(&fqdn)?;
                route53.client.change_record(
                    &zone_id,
                    ChangeAction::Delete,
                    &fqdn,
                    "TXT",
                    self.ttl(),
                    &[quote_txt(value)],
                )?;
                Ok(())
            }
        }
    }
}

impl Route53Dns01 {
    fn zone_id(&self, fqdn: &str) -> DnsResult<String> {
        match &self.hosted_zone_id {
            Some(id) => Ok(id.clone()),
            None => self.client.find_hosted_zone(fqdn),
        }
    }
}
