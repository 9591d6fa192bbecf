use chrono::{DateTime, Utc};
use openssl::{asn1::Asn1Time, nid::Nid, x509::X509};
use thiserror::Error;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate name is not valid UTF-8")]
    InvalidName,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// 已保存的 X.509 證書，提供續約判斷所需的資訊。
pub struct Certificate {
    cert: X509,
}

impl Certificate {
    /// 解析 PEM 格式的證書；若為證書鏈則取第一張。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let cert = X509::from_pem(pem)?;
        Ok(Certificate { cert })
    }

    /// 證書涵蓋的網域，依序為主體 CN 與 CN 以外的 DNS SAN。
    pub fn domains(&self) -> Result<Vec<String>> {
        let mut domains = Vec::new();
        if let Some(entry) = self
            .cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
        {
            let cn = entry
                .data()
                .to_string()
                .map_err(|_| CertificateError::InvalidName)?;
            domains.push(cn);
        }

        if let Some(names) = self.cert.subject_alt_names() {
            for dns in names.iter().filter_map(|name| name.dnsname()) {
                if domains.first().map(String::as_str) != Some(dns) {
                    domains.push(dns.to_string());
                }
            }
        }
        Ok(domains)
    }

    /// 距離到期的完整天數，已過期時為負數。
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Result<i64> {
        let now = Asn1Time::from_unix(now.timestamp())?;
        let diff = now.diff(self.cert.not_after())?;
        Ok(i64::from(diff.days))
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.cert.subject_name())
            .field("not_after", &self.cert.not_after().to_string())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::*, *};
    use chrono::Duration;

    #[test]
    fn test_domains_cn_first_without_duplicates() {
        let (pem, _) = self_signed(
            "example.com",
            &["example.com", "www.example.com", "api.example.com"],
            now() + Duration::days(60),
        );
        let cert = Certificate::from_pem(&pem).unwrap();
        assert_eq!(
            cert.domains().unwrap(),
            vec!["example.com", "www.example.com", "api.example.com"]
        );
    }

    #[test]
    fn test_domains_cn_only() {
        let (pem, _) = self_signed("example.com", &[], now() + Duration::days(60));
        let cert = Certificate::from_pem(&pem).unwrap();
        assert_eq!(cert.domains().unwrap(), vec!["example.com"]);
    }

    #[test]
    fn test_days_until_expiry() {
        let (pem, _) = self_signed("example.com", &[], now() + Duration::days(45));
        let cert = Certificate::from_pem(&pem).unwrap();
        assert_eq!(cert.days_until_expiry(now()).unwrap(), 45);

        let partial = now() + Duration::days(10) + Duration::hours(23);
        let (pem, _) = self_signed("example.com", &[], partial);
        let cert = Certificate::from_pem(&pem).unwrap();
        assert_eq!(cert.days_until_expiry(now()).unwrap(), 10);
    }

    #[test]
    fn test_expired_certificate_is_negative() {
        let (pem, _) = self_signed("example.com", &[], now() - Duration::days(3));
        let cert = Certificate::from_pem(&pem).unwrap();
        assert_eq!(cert.days_until_expiry(now()).unwrap(), -3);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Certificate::from_pem(b"not a certificate").is_err());
    }
}
