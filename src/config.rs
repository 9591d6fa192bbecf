//! 設定檔的載入與驗證。
//!
//! 設定以 JSON 描述，先反序列化成寬鬆的 [`RawConfiguration`]（所有欄位皆可缺省），
//! 再經由 [`Configuration::validate`] 依固定順序逐項檢查，轉換為型別化且已驗證的
//! [`Configuration`]。其餘元件只接受後者，因此設定錯誤一定在任何網路或檔案寫入之前被攔下。

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

/// Let's Encrypt 正式環境目錄。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境目錄，簽發的憑證不受信任。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not deserialize {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {field} in configuration: expected one of: [{}], got '{got}'", .expected.join(" "))]
    UnsupportedValue {
        field: &'static str,
        expected: &'static [&'static str],
        got: String,
    },
    #[error("{field} must be configured")]
    Missing { field: &'static str },
    #[error("domains must be a non empty array")]
    NoDomains,
    #[error("http_server_handler must be provided when using the http_reverse_proxy provider_type")]
    ProxyWithoutServer,
    #[error("{field} must be provided when using the {provider} provider_type")]
    MissingCredential {
        field: &'static str,
        provider: &'static str,
    },
    #[error("invalid acme_directory in configuration: expected 'production', 'staging' or an https URL, got '{0}'")]
    InvalidDirectory(String),
}

impl ConfigError {
    /// 出錯的設定欄位名稱；讀檔或解析錯誤時為 `None`。
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Read { .. } | Self::Parse { .. } => None,
            Self::UnsupportedValue { field, .. }
            | Self::Missing { field }
            | Self::MissingCredential { field, .. } => Some(field),
            Self::NoDomains => Some("domains"),
            Self::ProxyWithoutServer => Some("http_server_handler"),
            Self::InvalidDirectory(_) => Some("acme_directory"),
        }
    }
}

type Result<T> = std::result::Result<T, ConfigError>;

/// 需要與本機公開位址保持同步的 DNS 記錄。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DnsRecord {
    /// 記錄所屬的網域（zone），例如 `example.com`。
    pub domain: String,
    /// 記錄名稱，例如 `www`；`@` 代表網域本身。
    pub name: String,
}

impl DnsRecord {
    /// 記錄的完整網域名稱。
    pub fn fqdn(&self) -> String {
        if self.name.is_empty() || self.name == "@" {
            self.domain.clone()
        } else {
            format!("{}.{}", self.name, self.domain)
        }
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn())
    }
}

/// 尚未驗證的設定文件，欄位名稱與 JSON 一致。
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RawConfiguration {
    pub key_type: String,
    pub email: String,
    pub domains: Vec<String>,
    pub provider_type: String,
    pub http_server_handler: String,
    pub dns_client_id: String,
    pub dns_client_secret: String,
    pub dns_region: String,
    pub dns_hosted_zone_id: String,
    pub dns_records_to_update: Vec<DnsRecord>,
    pub storage_path: String,
    pub acme_directory: String,
}

/// 帳戶與憑證金鑰的演算法與長度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    P256,
    P384,
    Rsa2048,
    Rsa4096,
    Rsa8192,
}

impl KeyType {
    pub const NAMES: &'static [&'static str] = &["P256", "P384", "2048", "4096", "8192"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "P256" => Some(Self::P256),
            "P384" => Some(Self::P384),
            "2048" => Some(Self::Rsa2048),
            "4096" => Some(Self::Rsa4096),
            "8192" => Some(Self::Rsa8192),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P256 => "P256",
            Self::P384 => "P384",
            Self::Rsa2048 => "2048",
            Self::Rsa4096 => "4096",
            Self::Rsa8192 => "8192",
        }
    }

    /// RSA 金鑰長度；橢圓曲線金鑰回傳 `None`。
    pub fn rsa_bits(&self) -> Option<u32> {
        match self {
            Self::Rsa2048 => Some(2048),
            Self::Rsa4096 => Some(4096),
            Self::Rsa8192 => Some(8192),
            Self::P256 | Self::P384 => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 目標 HTTP 伺服器的種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHandlerType {
    None,
    Nginx,
}

impl ServerHandlerType {
    pub const NAMES: &'static [&'static str] = &["none", "nginx"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "nginx" => Some(Self::Nginx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Nginx => "nginx",
        }
    }
}

/// `provider_type` 的標籤，只在驗證過程中使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Http,
    HttpReverseProxy,
    Gandi,
    Route53,
}

impl ProviderKind {
    const NAMES: &'static [&'static str] = &["http", "http_reverse_proxy", "gandi", "route53"];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "http_reverse_proxy" => Some(Self::HttpReverseProxy),
            "gandi" => Some(Self::Gandi),
            "route53" => Some(Self::Route53),
            _ => None,
        }
    }
}

/// Gandi LiveDNS 的憑證。
#[derive(Clone, PartialEq, Eq)]
pub struct GandiCredentials {
    pub api_key: String,
}

impl fmt::Debug for GandiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GandiCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// AWS Route53 的憑證與區域設定。
#[derive(Clone, PartialEq, Eq)]
pub struct Route53Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// 未設定時依網域自動偵測 hosted zone。
    pub hosted_zone_id: Option<String>,
}

impl fmt::Debug for Route53Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route53Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("hosted_zone_id", &self.hosted_zone_id)
            .finish()
    }
}

/// 網域驗證方式，DNS 供應商的變體直接攜帶其所需憑證。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderType {
    Http,
    HttpReverseProxy,
    Gandi(GandiCredentials),
    Route53(Route53Credentials),
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::HttpReverseProxy => "http_reverse_proxy",
            Self::Gandi(_) => "gandi",
            Self::Route53(_) => "route53",
        }
    }
}

/// 已驗證的設定。
#[derive(Debug, Clone)]
pub struct Configuration {
    key_type: KeyType,
    email: String,
    domains: Vec<String>,
    provider: ProviderType,
    server_handler: ServerHandlerType,
    storage_path: PathBuf,
    dns_records: Vec<DnsRecord>,
    directory_url: String,
}

impl Configuration {
    /// 讀取並驗證指定路徑的 JSON 設定檔。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfiguration =
            serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(raw)
    }

    /// 依序檢查設定，遇到第一個違規即回傳對應錯誤。
    ///
    /// 檢查順序：金鑰類型、驗證方式、伺服器類型、儲存路徑、網域清單、電子郵件、
    /// 反向代理與伺服器的組合、各 DNS 供應商所需的憑證。
    pub fn validate(raw: RawConfiguration) -> Result<Self> {
        let key_type =
            KeyType::parse(&raw.key_type).ok_or_else(|| ConfigError::UnsupportedValue {
                field: "key_type",
                expected: KeyType::NAMES,
                got: raw.key_type.clone(),
            })?;
        let provider_kind = ProviderKind::parse(&raw.provider_type).ok_or_else(|| {
            ConfigError::UnsupportedValue {
                field: "provider_type",
                expected: ProviderKind::NAMES,
                got: raw.provider_type.clone(),
            }
        })?;
        let server_handler = ServerHandlerType::parse(&raw.http_server_handler).ok_or_else(
            || ConfigError::UnsupportedValue {
                field: "http_server_handler",
                expected: ServerHandlerType::NAMES,
                got: raw.http_server_handler.clone(),
            },
        )?;
        if raw.storage_path.is_empty() {
            return Err(ConfigError::Missing {
                field: "storage_path",
            });
        }
        if raw.domains.is_empty() {
            return Err(ConfigError::NoDomains);
        }
        if raw.email.is_empty() {
            return Err(ConfigError::Missing { field: "email" });
        }

        let provider = match provider_kind {
            ProviderKind::Http => ProviderType::Http,
            ProviderKind::HttpReverseProxy => {
                if server_handler == ServerHandlerType::None {
                    return Err(ConfigError::ProxyWithoutServer);
                }
                ProviderType::HttpReverseProxy
            }
            ProviderKind::Gandi => {
                require(&raw.dns_client_secret, "dns_client_secret", "gandi")?;
                ProviderType::Gandi(GandiCredentials {
                    api_key: raw.dns_client_secret,
                })
            }
            ProviderKind::Route53 => {
                require(&raw.dns_client_id, "dns_client_id", "route53")?;
                require(&raw.dns_client_secret, "dns_client_secret", "route53")?;
                require(&raw.dns_region, "dns_region", "route53")?;
                ProviderType::Route53(Route53Credentials {
                    access_key_id: raw.dns_client_id,
                    secret_access_key: raw.dns_client_secret,
                    region: raw.dns_region,
                    hosted_zone_id: Some(raw.dns_hosted_zone_id).filter(|id| !id.is_empty()),
                })
            }
        };

        let directory_url = resolve_directory(&raw.acme_directory)?;

        Ok(Self {
            key_type,
            email: raw.email,
            domains: raw.domains,
            provider,
            server_handler,
            storage_path: PathBuf::from(raw.storage_path),
            dns_records: raw.dns_records_to_update,
            directory_url,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// 憑證需涵蓋的網域，順序即為請求與比對順序。
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn provider(&self) -> &ProviderType {
        &self.provider
    }

    pub fn server_handler(&self) -> ServerHandlerType {
        self.server_handler
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn dns_records(&self) -> &[DnsRecord] {
        &self.dns_records
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }
}

fn require(value: &str, field: &'static str, provider: &'static str) -> Result<()> {
    if value.is_empty() {
        return Err(ConfigError::MissingCredential { field, provider });
    }
    Ok(())
}

fn resolve_directory(value: &str) -> Result<String> {
    match value {
        "" | "production" => Ok(LETS_ENCRYPT_PRODUCTION.to_string()),
        "staging" => Ok(LETS_ENCRYPT_STAGING.to_string()),
        url if url.starts_with("https://") => Ok(url.to_string()),
        other => Err(ConfigError::InvalidDirectory(other.to_string())),
    }
}
