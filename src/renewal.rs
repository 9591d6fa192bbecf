//! 判斷是否需要簽發新憑證。

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    certificate::CertificateError,
    storage::{CertificateStore, StoreError},
};

/// 剩餘天數大於此值時不需續約。
pub const RENEWAL_THRESHOLD_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not inspect stored certificate: {0}")]
    Certificate(#[from] CertificateError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalReason {
    /// 尚未有任何憑證。
    Missing,
    /// 憑證涵蓋的網域與設定不同。
    DomainsChanged { current: Vec<String> },
    /// 即將或已經到期。
    Expiring { days_remaining: i64 },
}

impl fmt::Display for RenewalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("no certificate stored yet"),
            Self::DomainsChanged { current } => {
                write!(f, "certificate covers different domains: {:?}", current)
            }
            Self::Expiring { days_remaining } => write!(
                f,
                "certificate expires in {} days, threshold is {} days",
                days_remaining, RENEWAL_THRESHOLD_DAYS
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalDecision {
    NeedsAction(RenewalReason),
    UpToDate { days_remaining: i64 },
}

/// 讀取已保存的憑證並與設定的網域、到期日比對。
///
/// 網域順序也必須相同；剩餘天數恰為門檻時仍需續約。
pub fn decide(
    store: &CertificateStore,
    domains: &[String],
    now: DateTime<Utc>,
) -> Result<RenewalDecision, DecisionError> {
    let Some(certificate) = store.load()? else {
        return Ok(RenewalDecision::NeedsAction(RenewalReason::Missing));
    };

    let current = certificate.domains()?;
    if current != domains {
        return Ok(RenewalDecision::NeedsAction(RenewalReason::DomainsChanged {
            current,
        }));
    }

    let days_remaining = certificate.days_until_expiry(now)?;
    if days_remaining > RENEWAL_THRESHOLD_DAYS {
        Ok(RenewalDecision::UpToDate { days_remaining })
    } else {
        Ok(RenewalDecision::NeedsAction(RenewalReason::Expiring {
            days_remaining,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::testing::{now, self_signed};
    use chrono::Duration;
    use std::fs;

    fn store_with(cn: &str, sans: &[&str], days: i64) -> (tempfile::TempDir, CertificateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let (cert, _) = self_signed(cn, sans, now() + Duration::days(days));
        fs::write(store.cert_path(), cert).unwrap();
        (dir, store)
    }

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_certificate_needs_action() {
        let dir = tempfile::tempdir().unwrap();
        let decision = decide(
            &CertificateStore::new(dir.path()),
            &domains(&["example.com"]),
            now(),
        )
        .unwrap();
        assert_eq!(decision, RenewalDecision::NeedsAction(RenewalReason::Missing));
    }

    #[test]
    fn test_valid_certificate_is_up_to_date() {
        let (_dir, store) = store_with("example.com", &["example.com", "www.example.com"], 45);
        let decision = decide(&store, &domains(&["example.com", "www.example.com"]), now()).unwrap();
        assert_eq!(decision, RenewalDecision::UpToDate { days_remaining: 45 });
    }

    #[test]
    fn test_exactly_threshold_renews() {
        let (_dir, store) = store_with("example.com", &[], 30);
        let decision = decide(&store, &domains(&["example.com"]), now()).unwrap();
        assert_eq!(
            decision,
            RenewalDecision::NeedsAction(RenewalReason::Expiring { days_remaining: 30 })
        );

        let (_dir, store) = store_with("example.com", &[], 31);
        assert_eq!(
            decide(&store, &domains(&["example.com"]), now()).unwrap(),
            RenewalDecision::UpToDate { days_remaining: 31 }
        );
    }

    #[test]
    fn test_domain_order_matters() {
        let (_dir, store) = store_with("www.example.com", &["example.com"], 60);
        let decision = decide(&store, &domains(&["example.com", "www.example.com"]), now()).unwrap();
        assert_eq!(
            decision,
            RenewalDecision::NeedsAction(RenewalReason::DomainsChanged {
                current: domains(&["www.example.com", "example.com"]),
            })
        );
    }

    #[test]
    fn test_added_domain_renews() {
        let (_dir, store) = store_with("example.com", &[], 60);
        let decision = decide(&store, &domains(&["example.com", "api.example.com"]), now()).unwrap();
        assert!(matches!(
            decision,
            RenewalDecision::NeedsAction(RenewalReason::DomainsChanged { .. })
        ));
    }

    #[test]
    fn test_unparseable_certificate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        fs::write(store.cert_path(), b"-----BEGIN CERTIFICATE-----\nAAAA\n").unwrap();
        assert!(matches!(
            decide(&store, &domains(&["example.com"]), now()),
            Err(DecisionError::Store(StoreError::Parse { .. }))
        ));
    }
}
