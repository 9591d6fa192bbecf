//! 挑戰供應商的選擇。
//!
//! 依設定的驗證方式與前端伺服器是否正在運作，決定本次使用哪一種網域驗證機制。

use std::{io, time::Duration};

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::info;

use crate::{
    challenge::{dns_txt_value, ChallengeType},
    config::{Configuration, ProviderType},
    dns::DnsError,
    dns01::Dns01Provider,
    http,
    http01::{Http01Provider, Http01Server},
};

/// 直接對外時 HTTP-01 回應器使用的連接埠。
pub const HTTP_PORT: u16 = 80;
/// 前端伺服器運作中時，回應器改聽此連接埠，由伺服器轉發挑戰請求。
pub const REVERSE_PROXY_PORT: u16 = 8888;
/// 反向代理轉發原始主機名稱所用的標頭。
pub const FORWARDED_HOST_HEADER: &str = "X-Forwarded-Host";
/// Gandi API 請求的逾時。
pub const GANDI_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP-01 授權輪詢的上限與間隔。
pub const HTTP01_VALIDATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const HTTP01_POLLING_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("could not start HTTP-01 responder on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("DNS provider {provider} failed: {source}")]
    Dns {
        provider: &'static str,
        #[source]
        source: DnsError,
    },
    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

type Result<T> = std::result::Result<T, ProviderError>;

/// 發布與撤除單一挑戰回應的介面。
pub trait ChallengeSolver {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;
    fn cleanup(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;
}

impl ChallengeSolver for Http01Server {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        self.add(domain, token, key_authorization);
        Ok(())
    }

    fn cleanup(&self, _domain: &str, token: &str, _key_authorization: &str) -> Result<()> {
        self.remove(token);
        Ok(())
    }
}

impl ChallengeSolver for Dns01Provider {
    fn present(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        Dns01Provider::present(self, domain, &dns_txt_value(key_authorization)).map_err(|source| {
            ProviderError::Dns {
                provider: self.name(),
                source,
            }
        })
    }

    fn cleanup(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        Dns01Provider::cleanup(self, domain, &dns_txt_value(key_authorization)).map_err(|source| {
            ProviderError::Dns {
                provider: self.name(),
                source,
            }
        })
    }
}

/// 本次執行使用的網域驗證機制，只會有一個。
#[derive(Debug, Clone)]
pub enum ChallengeProvider {
    Http01(Http01Provider),
    Dns01(Dns01Provider),
}

impl ChallengeProvider {
    pub fn challenge_type(&self) -> ChallengeType {
        match self {
            Self::Http01(_) => ChallengeType::Http01,
            Self::Dns01(_) => ChallengeType::Dns01,
        }
    }

    /// 授權輪詢的上限與間隔。
    pub fn validation_timing(&self) -> (Duration, Duration) {
        match self {
            Self::Http01(_) => (HTTP01_VALIDATION_TIMEOUT, HTTP01_POLLING_INTERVAL),
            Self::Dns01(dns) => (dns.propagation_timeout(), dns.polling_interval()),
        }
    }

    /// 準備好可發布回應的 solver；HTTP-01 會在此時綁定連接埠。
    pub fn solver(&self) -> Result<Box<dyn ChallengeSolver>> {
        match self {
            Self::Http01(provider) => {
                let server = provider.start().map_err(|source| ProviderError::Bind {
                    port: provider.port(),
                    source,
                })?;
                Ok(Box::new(server))
            }
            Self::Dns01(provider) => Ok(Box::new(provider.clone())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Http01(p) => match p.proxy_header() {
                Some(header) => format!("http-01 on port {} (trusting {})", p.port(), header),
                None => format!("http-01 on port {}", p.port()),
            },
            Self::Dns01(p) => format!("dns-01 via {}", p.name()),
        }
    }
}

/// 依設定與伺服器狀態選擇驗證機制。
///
/// - `http`：在 80 埠回應。
/// - `http_reverse_proxy`：伺服器運作中時在 8888 埠回應並信任 `X-Forwarded-Host`，
///   否則直接在 80 埠回應。
/// - `gandi`、`route53`：以對應的 DNS 供應商進行 DNS-01。
pub fn select_challenge_provider(
    config: &Configuration,
    server_running: bool,
    client: &Client,
) -> Result<ChallengeProvider> {
    let provider = match config.provider() {
        ProviderType::Http => ChallengeProvider::Http01(Http01Provider::new(HTTP_PORT)),
        ProviderType::HttpReverseProxy if server_running => ChallengeProvider::Http01(
            Http01Provider::behind_proxy(REVERSE_PROXY_PORT, FORWARDED_HOST_HEADER),
        ),
        ProviderType::HttpReverseProxy => {
            ChallengeProvider::Http01(Http01Provider::new(HTTP_PORT))
        }
        ProviderType::Gandi(credentials) => {
            let api_client = http::build_client_with_timeout(GANDI_REQUEST_TIMEOUT)?;
            ChallengeProvider::Dns01(Dns01Provider::gandi(
                credentials,
                api_client,
                client.clone(),
            ))
        }
        ProviderType::Route53(credentials) => {
            ChallengeProvider::Dns01(Dns01Provider::route53(credentials, client.clone()))
        }
    };
    info!(provider = %provider.describe(), "selected challenge provider");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfiguration;

    fn config(provider_type: &str, handler: &str) -> Configuration {
        Configuration::validate(RawConfiguration {
            key_type: "P256".into(),
            email: "admin@example.com".into(),
            domains: vec!["example.com".into()],
            provider_type: provider_type.into(),
            http_server_handler: handler.into(),
            dns_client_id: "id".into(),
            dns_client_secret: "secret".into(),
            dns_region: "eu-west-1".into(),
            storage_path: "/tmp/certs".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn http01(provider: ChallengeProvider) -> Http01Provider {
        match provider {
            ChallengeProvider::Http01(p) => p,
            other => panic!("expected http-01, got {}", other.describe()),
        }
    }

    #[test]
    fn test_http_listens_on_port_80() {
        for running in [false, true] {
            let provider =
                select_challenge_provider(&config("http", "nginx"), running, &Client::new())
                    .unwrap();
            let p = http01(provider);
            assert_eq!(p.port(), 80);
            assert_eq!(p.proxy_header(), None);
        }
    }

    #[test]
    fn test_reverse_proxy_with_running_server() {
        let provider = select_challenge_provider(
            &config("http_reverse_proxy", "nginx"),
            true,
            &Client::new(),
        )
        .unwrap();
        let p = http01(provider);
        assert_eq!(p.port(), 8888);
        assert_eq!(p.proxy_header(), Some("X-Forwarded-Host"));
    }

    #[test]
    fn test_reverse_proxy_with_stopped_server() {
        let provider = select_challenge_provider(
            &config("http_reverse_proxy", "nginx"),
            false,
            &Client::new(),
        )
        .unwrap();
        let p = http01(provider);
        assert_eq!(p.port(), 80);
        assert_eq!(p.proxy_header(), None);
    }

    #[test]
    fn test_dns_providers() {
        let gandi =
            select_challenge_provider(&config("gandi", "none"), false, &Client::new()).unwrap();
        assert_eq!(gandi.challenge_type(), ChallengeType::Dns01);
        assert_eq!(gandi.describe(), "dns-01 via gandi");
        assert_eq!(
            gandi.validation_timing(),
            (Duration::from_secs(1200), Duration::from_secs(20))
        );

        let route53 =
            select_challenge_provider(&config("route53", "none"), true, &Client::new()).unwrap();
        assert_eq!(route53.describe(), "dns-01 via route53");
        assert_eq!(
            route53.validation_timing(),
            (Duration::from_secs(120), Duration::from_secs(4))
        );
    }

    #[test]
    fn test_http01_server_as_solver() {
        use std::io::{Read, Write};
        use std::net::{IpAddr, Ipv4Addr, TcpStream};

        let server = Http01Provider::new(0)
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .start()
            .unwrap();
        let get = |server: &Http01Server| {
            let mut stream = TcpStream::connect(server.local_addr()).unwrap();
            stream
                .write_all(b"GET /.well-known/acme-challenge/tok HTTP/1.1\r\nHost: example.com\r\n\r\n")
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        };

        let solver: &dyn ChallengeSolver = &server;
        solver.present("example.com", "tok", "tok.thumb").unwrap();
        assert!(get(&server).ends_with("tok.thumb"));

        solver.cleanup("example.com", "tok", "tok.thumb").unwrap();
        assert!(get(&server).starts_with("HTTP/1.1 404"));
    }
}
