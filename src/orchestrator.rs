//! 單次執行的憑證生命週期流程。
//!
//! 依序進行：DNS 同步（伺服器未運作時）、續約判斷、建立並註冊帳戶、
//! 選擇驗證機制、簽發、保存、通知伺服器重新載入。任何一步失敗即中止，
//! 錯誤帶有失敗的階段。

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    account::Account,
    client::{AcmeError, CertificateAuthority},
    config::Configuration,
    dns::DnsError,
    dns_updater::DnsUpdate,
    provider::{select_challenge_provider, ProviderError},
    renewal::{decide, DecisionError, RenewalDecision, RENEWAL_THRESHOLD_DAYS},
    server_handler::{HttpServerHandler, ServerError},
    storage::{CertificateStore, StoreError},
};

/// 流程中的階段，用於標示錯誤來源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DnsSync,
    Decision,
    Account,
    Provider,
    Issuance,
    Persistence,
    Reload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DnsSync => "dns sync",
            Self::Decision => "renewal decision",
            Self::Account => "account registration",
            Self::Provider => "challenge provider setup",
            Self::Issuance => "certificate issuance",
            Self::Persistence => "certificate persistence",
            Self::Reload => "server reload",
        })
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("dns sync failed: {0}")]
    DnsSync(#[source] DnsError),
    #[error("renewal decision failed: {0}")]
    Decision(#[source] DecisionError),
    #[error("account registration failed: {0}")]
    Account(#[source] AcmeError),
    #[error("challenge provider setup failed: {0}")]
    Provider(#[source] AcmeError),
    #[error("certificate issuance failed: {0}")]
    Issuance(#[source] AcmeError),
    #[error("certificate persistence failed: {0}")]
    Persistence(#[source] StoreError),
    #[error("{server} reload failed: {source}")]
    Reload {
        server: &'static str,
        #[source]
        source: ServerError,
    },
}

impl RunError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::DnsSync(_) => Stage::DnsSync,
            Self::Decision(_) => Stage::Decision,
            Self::Account(_) => Stage::Account,
            Self::Provider(_) => Stage::Provider,
            Self::Issuance(_) => Stage::Issuance,
            Self::Persistence(_) => Stage::Persistence,
            Self::Reload { .. } => Stage::Reload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 既有憑證仍有效，未做任何變更。
    UpToDate { days_remaining: i64 },
    /// 已簽發並保存新憑證；`reloaded` 表示是否通知了伺服器。
    Renewed { reloaded: bool },
}

pub struct Orchestrator<'a> {
    config: &'a Configuration,
    store: CertificateStore,
    http: Client,
    server: &'a dyn HttpServerHandler,
    dns: &'a dyn DnsUpdate,
    ca: &'a mut dyn CertificateAuthority,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Configuration,
        http: Client,
        server: &'a dyn HttpServerHandler,
        dns: &'a dyn DnsUpdate,
        ca: &'a mut dyn CertificateAuthority,
    ) -> Self {
        Self {
            config,
            store: CertificateStore::new(config.storage_path()),
            http,
            server,
            dns,
            ca,
        }
    }

    pub fn run(&mut self) -> Result<RunOutcome, RunError> {
        self.run_at(Utc::now())
    }

    /// 以 `now` 作為目前時間執行一次完整流程。
    pub fn run_at(&mut self, now: DateTime<Utc>) -> Result<RunOutcome, RunError> {
        let server_running = self.server.is_running();
        debug!(server = self.server.name(), running = server_running, "checked server");

        if !server_running && !self.config.dns_records().is_empty() {
            info!(records = self.config.dns_records().len(), "updating DNS records");
            self.dns.update().map_err(RunError::DnsSync)?;
        }

        let decision =
            decide(&self.store, self.config.domains(), now).map_err(RunError::Decision)?;
        let reason = match decision {
            RenewalDecision::UpToDate { days_remaining } => {
                info!(
                    "certificate expires in {} days, threshold is {} days: no renewal.",
                    days_remaining, RENEWAL_THRESHOLD_DAYS
                );
                return Ok(RunOutcome::UpToDate { days_remaining });
            }
            RenewalDecision::NeedsAction(reason) => reason,
        };
        info!(%reason, "certificate needs renewal");

        let mut account = Account::new(self.config.email(), self.config.key_type())
            .map_err(|e| RunError::Account(e.into()))?;
        self.ca
            .register(&mut account)
            .map_err(RunError::Account)?;

        let provider = select_challenge_provider(self.config, server_running, &self.http)
            .map_err(|e| RunError::Provider(e.into()))?;
        self.ca
            .set_challenge_provider(provider)
            .map_err(RunError::Provider)?;

        // HTTP-01 回應器在 obtain 內才綁定連接埠，綁定失敗仍屬驗證機制設定錯誤
        let issued = self
            .ca
            .obtain(&account, self.config.domains())
            .map_err(|e| match e {
                e @ AcmeError::Provider(ProviderError::Bind { .. }) => RunError::Provider(e),
                e => RunError::Issuance(e),
            })?;
        self.store.save(&issued).map_err(RunError::Persistence)?;

        let reloaded = self.server.is_running();
        if reloaded {
            info!(server = self.server.name(), "reloading server");
            self.server.reload().map_err(|source| RunError::Reload {
                server: self.server.name(),
                source,
            })?;
        }
        Ok(RunOutcome::Renewed { reloaded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        certificate::testing::{now, self_signed},
        client::IssuedCertificate,
        config::{ConfigError, RawConfiguration},
        dns::DnsResult,
        provider::ChallengeProvider,
    };
    use chrono::Duration;
    use std::{
        cell::{Cell, RefCell},
        fs,
    };

    #[derive(Default)]
    struct FakeServer {
        running: Cell<bool>,
        /// 第一次查詢後改變狀態，模擬流程中途啟動或停止。
        running_after_first_check: Option<bool>,
        checks: Cell<usize>,
        reloads: Cell<usize>,
        fail_reload: bool,
    }

    impl HttpServerHandler for FakeServer {
        fn is_running(&self) -> bool {
            let running = self.running.get();
            self.checks.set(self.checks.get() + 1);
            if let Some(next) = self.running_after_first_check {
                self.running.set(next);
            }
            running
        }

        fn reload(&self) -> Result<(), ServerError> {
            self.reloads.set(self.reloads.get() + 1);
            if self.fail_reload {
                return Err(ServerError::Spawn {
                    command: "fake -s reload".to_string(),
                    source: std::io::Error::other("boom"),
                });
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[derive(Default)]
    struct FakeDns {
        updates: Cell<usize>,
        fail: bool,
    }

    impl DnsUpdate for FakeDns {
        fn update(&self) -> DnsResult<()> {
            self.updates.set(self.updates.get() + 1);
            if self.fail {
                return Err(DnsError::ZoneNotFound("example.com".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeCa {
        calls: RefCell<Vec<String>>,
        provider: Option<ChallengeProvider>,
        fail_obtain: bool,
        port_in_use: bool,
    }

    impl CertificateAuthority for FakeCa {
        fn register(&mut self, account: &mut Account) -> Result<(), AcmeError> {
            self.calls.borrow_mut().push(format!("register {}", account.email));
            account.registration = Some(crate::account::Registration {
                url: "https://ca.test/acct/1".to_string(),
            });
            Ok(())
        }

        fn set_challenge_provider(&mut self, provider: ChallengeProvider) -> Result<(), AcmeError> {
            if self.provider.is_some() {
                return Err(AcmeError::ProviderAlreadySet);
            }
            self.calls
                .borrow_mut()
                .push(format!("provider {}", provider.describe()));
            self.provider = Some(provider);
            Ok(())
        }

        fn obtain(
            &mut self,
            account: &Account,
            domains: &[String],
        ) -> Result<IssuedCertificate, AcmeError> {
            assert!(account.is_registered());
            self.calls
                .borrow_mut()
                .push(format!("obtain {}", domains.join(",")));
            if self.port_in_use {
                return Err(AcmeError::Provider(ProviderError::Bind {
                    port: 80,
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                }));
            }
            if self.fail_obtain {
                return Err(AcmeError::OrderFailed("rejected".to_string()));
            }
            let sans: Vec<&str> = domains.iter().map(String::as_str).collect();
            let (certificate, private_key) =
                self_signed(&domains[0], &sans, Utc::now() + Duration::days(90));
            Ok(IssuedCertificate {
                domain: domains[0].clone(),
                certificate,
                private_key,
            })
        }
    }

    fn config(provider: &str, handler: &str, storage: &std::path::Path) -> Configuration {
        config_with_records(
            provider,
            handler,
            storage,
            vec![crate::config::DnsRecord {
                domain: "a.example".into(),
                name: "www".into(),
            }],
        )
    }

    fn config_with_records(
        provider: &str,
        handler: &str,
        storage: &std::path::Path,
        records: Vec<crate::config::DnsRecord>,
    ) -> Configuration {
        Configuration::validate(RawConfiguration {
            key_type: "P256".into(),
            email: "admin@example.com".into(),
            domains: vec!["a.example".into(), "b.example".into()],
            provider_type: provider.into(),
            http_server_handler: handler.into(),
            dns_client_id: "id".into(),
            dns_client_secret: "secret".into(),
            dns_region: "eu-west-1".into(),
            dns_records_to_update: records,
            storage_path: storage.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .unwrap()
    }

    fn write_existing(storage: &std::path::Path, days: i64) {
        let (cert, key) = self_signed(
            "a.example",
            &["a.example", "b.example"],
            now() + Duration::days(days),
        );
        fs::write(storage.join("server.crt"), cert).unwrap();
        fs::write(storage.join("server.key"), key).unwrap();
    }

    #[test]
    fn test_fresh_issuance_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("http", "none", dir.path());
        let server = FakeServer::default();
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let outcome = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap();

        assert_eq!(outcome, RunOutcome::Renewed { reloaded: false });
        assert_eq!(
            ca.calls.into_inner(),
            vec![
                "register admin@example.com",
                "provider http-01 on port 80",
                "obtain a.example,b.example",
            ]
        );
        assert_eq!(server.reloads.get(), 0);
        let stored = CertificateStore::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(stored.domains().unwrap(), vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_valid_certificate_skips_renewal() {
        let dir = tempfile::tempdir().unwrap();
        write_existing(dir.path(), 45);
        let config = config("http", "none", dir.path());
        let server = FakeServer::default();
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let outcome = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap();

        assert_eq!(outcome, RunOutcome::UpToDate { days_remaining: 45 });
        assert!(ca.calls.into_inner().is_empty());
    }

    #[test]
    fn test_missing_region_rejected_before_any_work() {
        let err = Configuration::validate(RawConfiguration {
            key_type: "P256".into(),
            email: "admin@example.com".into(),
            domains: vec!["a.example".into()],
            provider_type: "route53".into(),
            http_server_handler: "none".into(),
            dns_client_id: "id".into(),
            dns_client_secret: "secret".into(),
            storage_path: "/tmp/certs".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.field(), Some("dns_region"));
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
        assert!(err.to_string().contains("dns_region"));
    }

    #[test]
    fn test_reverse_proxy_with_running_server_reloads() {
        let dir = tempfile::tempdir().unwrap();
        write_existing(dir.path(), 10);
        let config = config("http_reverse_proxy", "nginx", dir.path());
        let server = FakeServer {
            running: Cell::new(true),
            ..Default::default()
        };
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let outcome = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap();

        assert_eq!(outcome, RunOutcome::Renewed { reloaded: true });
        assert_eq!(server.reloads.get(), 1);
        assert_eq!(server.checks.get(), 2);
        assert_eq!(dns.updates.get(), 0);
        assert!(ca
            .calls
            .into_inner()
            .contains(&"provider http-01 on port 8888 (trusting X-Forwarded-Host)".to_string()));
    }

    #[test]
    fn test_reload_uses_live_server_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("http_reverse_proxy", "nginx", dir.path());
        let server = FakeServer {
            running: Cell::new(true),
            running_after_first_check: Some(false),
            ..Default::default()
        };
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let outcome = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap();

        assert_eq!(outcome, RunOutcome::Renewed { reloaded: false });
        assert_eq!(server.reloads.get(), 0);
    }

    #[test]
    fn test_dns_sync_only_when_server_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_existing(dir.path(), 45);
        let config = config("gandi", "nginx", dir.path());

        let stopped = FakeServer::default();
        let dns = FakeDns::default();
        Orchestrator::new(&config, Client::new(), &stopped, &dns, &mut FakeCa::default())
            .run_at(now())
            .unwrap();
        assert_eq!(dns.updates.get(), 1);

        let running = FakeServer {
            running: Cell::new(true),
            ..Default::default()
        };
        let dns = FakeDns::default();
        Orchestrator::new(&config, Client::new(), &running, &dns, &mut FakeCa::default())
            .run_at(now())
            .unwrap();
        assert_eq!(dns.updates.get(), 0);
    }

    #[test]
    fn test_server_started_during_run_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("http", "nginx", dir.path());
        let server = FakeServer {
            running_after_first_check: Some(true),
            ..Default::default()
        };
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let outcome = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap();

        assert_eq!(outcome, RunOutcome::Renewed { reloaded: true });
        assert_eq!(server.reloads.get(), 1);
        assert!(ca
            .calls
            .into_inner()
            .contains(&"provider http-01 on port 80".to_string()));
    }

    #[test]
    fn test_no_dns_sync_without_records() {
        let dir = tempfile::tempdir().unwrap();
        write_existing(dir.path(), 45);
        let config = config_with_records("gandi", "nginx", dir.path(), Vec::new());
        let server = FakeServer::default();
        let dns = FakeDns {
            fail: true,
            ..Default::default()
        };

        let outcome = Orchestrator::new(&config, Client::new(), &server, &dns, &mut FakeCa::default())
            .run_at(now())
            .unwrap();

        assert_eq!(outcome, RunOutcome::UpToDate { days_remaining: 45 });
        assert_eq!(dns.updates.get(), 0);
    }

    #[test]
    fn test_port_conflict_is_a_provider_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("http", "none", dir.path());
        let server = FakeServer::default();
        let dns = FakeDns::default();
        let mut ca = FakeCa {
            port_in_use: true,
            ..Default::default()
        };

        let err = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Provider);
        assert!(err.to_string().contains("port 80"));
    }

    #[test]
    fn test_dns_failure_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("route53", "none", dir.path());
        let server = FakeServer::default();
        let dns = FakeDns {
            fail: true,
            ..Default::default()
        };
        let mut ca = FakeCa::default();

        let err = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap_err();

        assert_eq!(err.stage(), Stage::DnsSync);
        assert!(ca.calls.into_inner().is_empty());
    }

    #[test]
    fn test_issuance_failure_keeps_old_certificate() {
        let dir = tempfile::tempdir().unwrap();
        write_existing(dir.path(), 5);
        let before = fs::read(dir.path().join("server.crt")).unwrap();
        let config = config("http", "none", dir.path());
        let server = FakeServer::default();
        let dns = FakeDns::default();
        let mut ca = FakeCa {
            fail_obtain: true,
            ..Default::default()
        };

        let err = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Issuance);
        assert_eq!(fs::read(dir.path().join("server.crt")).unwrap(), before);
    }

    #[test]
    fn test_reload_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("http_reverse_proxy", "nginx", dir.path());
        let server = FakeServer {
            running: Cell::new(true),
            fail_reload: true,
            ..Default::default()
        };
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let err = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Reload);
        assert!(err.to_string().starts_with("fake reload failed"));
    }

    #[test]
    fn test_corrupt_certificate_stops_before_account() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("server.crt"), b"garbage").unwrap();
        let config = config("http", "none", dir.path());
        let server = FakeServer::default();
        let dns = FakeDns::default();
        let mut ca = FakeCa::default();

        let err = Orchestrator::new(&config, Client::new(), &server, &dns, &mut ca)
            .run_at(now())
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Decision);
        assert!(ca.calls.into_inner().is_empty());
    }
}
