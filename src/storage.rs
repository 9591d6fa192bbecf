//! 憑證與私鑰的保存。
//!
//! 兩個檔案都先寫入同目錄下的暫存檔，全部寫妥後才依序改名就位，
//! 中途失敗時既有檔案保持不變。

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    certificate::{Certificate, CertificateError},
    client::IssuedCertificate,
};

pub const CERT_FILE: &str = "server.crt";
pub const KEY_FILE: &str = "server.key";

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse certificate {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: CertificateError,
    },
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

type Result<T> = std::result::Result<T, StoreError>;

/// `storage_path` 目錄下的 `server.crt` 與 `server.key`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    /// 讀取已保存的憑證；檔案不存在時回傳 `None`。
    pub fn load(&self) -> Result<Option<Certificate>> {
        let path = self.cert_path();
        let pem = match fs::read(&path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored certificate");
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        let certificate =
            Certificate::from_pem(&pem).map_err(|source| StoreError::Parse { path, source })?;
        Ok(Some(certificate))
    }

    /// 以新憑證取代既有檔案，權限為 0600。
    pub fn save(&self, issued: &IssuedCertificate) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let key = self.stage(KEY_FILE, &issued.private_key)?;
        let cert = self.stage(CERT_FILE, &issued.certificate)?;

        for (staged, path) in [(key, self.key_path()), (cert, self.cert_path())] {
            staged.persist(&path).map_err(|e| StoreError::Write {
                path: path.clone(),
                source: e.error,
            })?;
        }
        info!(dir = %self.dir.display(), domain = %issued.domain, "stored certificate");
        Ok(())
    }

    fn stage(&self, name: &str, contents: &[u8]) -> Result<NamedTempFile> {
        let path = self.dir.join(name);
        let write = || -> io::Result<NamedTempFile> {
            let mut file = NamedTempFile::new_in(&self.dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.as_file()
                    .set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(contents)?;
            file.as_file().sync_all()?;
            Ok(file)
        };
        write().map_err(|source| StoreError::Write { path, source })
    }
}
