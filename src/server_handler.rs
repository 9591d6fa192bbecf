//! 前端 HTTP 伺服器的控制。

use std::{
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ServerHandlerType;

pub const NGINX_PID_FILE: &str = "/var/run/nginx.pid";
pub const NGINX_BINARY: &str = "nginx";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// 查詢伺服器狀態並要求其重新載入設定。
pub trait HttpServerHandler {
    fn is_running(&self) -> bool;
    fn reload(&self) -> Result<(), ServerError>;
    fn name(&self) -> &'static str;
}

/// 以 pid 檔判斷是否運作，並透過 `nginx -s reload` 重新載入。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nginx {
    pid_file: PathBuf,
    binary: PathBuf,
}

impl Default for Nginx {
    fn default() -> Self {
        Self::new(NGINX_PID_FILE, NGINX_BINARY)
    }
}

impl Nginx {
    pub fn new(pid_file: impl AsRef<Path>, binary: impl AsRef<Path>) -> Self {
        Self {
            pid_file: pid_file.as_ref().to_path_buf(),
            binary: binary.as_ref().to_path_buf(),
        }
    }

    fn command_line(&self) -> String {
        format!("{} -s reload", self.binary.display())
    }
}

impl HttpServerHandler for Nginx {
    fn is_running(&self) -> bool {
        self.pid_file.exists()
    }

    fn reload(&self) -> Result<(), ServerError> {
        let command = self.command_line();
        debug!(%command, "reloading nginx");
        let output = Command::new(&self.binary)
            .args(["-s", "reload"])
            .output()
            .map_err(|source| ServerError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ServerError::ExitStatus {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!("nginx reloaded");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "nginx"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerHandler {
    /// 沒有受管理的伺服器：永遠視為未運作，重新載入不做任何事。
    None,
    Nginx(Nginx),
}

impl ServerHandler {
    pub fn from_type(handler_type: ServerHandlerType) -> Self {
        match handler_type {
            ServerHandlerType::None => Self::None,
            ServerHandlerType::Nginx => Self::Nginx(Nginx::default()),
        }
    }
}

impl HttpServerHandler for ServerHandler {
    fn is_running(&self) -> bool {
        match self {
            Self::None => false,
            Self::Nginx(nginx) => nginx.is_running(),
        }
    }

    fn reload(&self) -> Result<(), ServerError> {
        match self {
            Self::None => Ok(()),
            Self::Nginx(nginx) => nginx.reload(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Nginx(nginx) => nginx.name(),
        }
    }
}
