//! HTTP-01 驗證回應器。
//!
//! 在指定連接埠開一個最小的 HTTP/1.1 伺服器，只回應
//! `GET /.well-known/acme-challenge/<token>`。請求的主機名稱需與 token 所屬網域相符；
//! 位於反向代理之後時改以代理轉發的標頭判斷原始主機。

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info, warn};

/// 挑戰檔案的路徑前綴。
pub const CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

const MAX_HEADERS: usize = 64;
const MAX_REQUEST_SIZE: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP-01 回應器的設定。
///
/// 預設綁定 `[::]`，在雙協定堆疊的主機上同時接受 IPv4 與 IPv6 連線；
/// 主機停用 IPv6 時退回 `0.0.0.0`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http01Provider {
    bind_ip: Option<IpAddr>,
    port: u16,
    proxy_header: Option<String>,
}

impl Http01Provider {
    /// 直接對外服務，以 `Host` 判斷主機。
    pub fn new(port: u16) -> Self {
        Self {
            bind_ip: None,
            port,
            proxy_header: None,
        }
    }

    /// 位於反向代理之後，信任 `header` 帶來的原始主機名稱。
    pub fn behind_proxy(port: u16, header: &str) -> Self {
        Self {
            proxy_header: Some(header.to_string()),
            ..Self::new(port)
        }
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = Some(ip);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn proxy_header(&self) -> Option<&str> {
        self.proxy_header.as_deref()
    }

    /// 綁定連接埠並啟動接受連線的執行緒。
    pub fn start(&self) -> io::Result<Http01Server> {
        let listener = self.bind()?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            tokens: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            proxy_header: self.proxy_header.clone(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("http-01".to_string())
            .spawn(move || serve(listener, thread_shared))?;

        info!(%addr, proxy_header = ?self.proxy_header, "HTTP-01 responder listening");
        Ok(Http01Server {
            addr,
            shared,
            handle: Some(handle),
        })
    }

    fn bind(&self) -> io::Result<TcpListener> {
        if let Some(ip) = self.bind_ip {
            return TcpListener::bind((ip, self.port));
        }
        match TcpListener::bind((Ipv6Addr::UNSPECIFIED, self.port)) {
            Ok(listener) => Ok(listener),
            Err(e) if e.kind() != io::ErrorKind::AddrInUse => {
                debug!(error = %e, "IPv6 unavailable, binding IPv4 only");
                TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port))
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingChallenge {
    domain: String,
    key_authorization: String,
}

#[derive(Debug)]
struct Shared {
    tokens: RwLock<HashMap<String, PendingChallenge>>,
    shutdown: AtomicBool,
    proxy_header: Option<String>,
}

impl Shared {
    /// 依請求內容找出應回應的 key authorization。
    fn lookup(&self, method: &str, path: &str, host: Option<&str>) -> Option<String> {
        if method != "GET" && method != "HEAD" {
            return None;
        }
        let token = path.strip_prefix(CHALLENGE_PATH_PREFIX)?;
        let host = strip_port(host?);
        let tokens = self.tokens.read().ok()?;
        let pending = tokens.get(token)?;
        if pending.domain.eq_ignore_ascii_case(host) {
            Some(pending.key_authorization.clone())
        } else {
            debug!(token, host, expected = %pending.domain, "HTTP-01 host mismatch");
            None
        }
    }

    fn host_header_name(&self) -> &str {
        self.proxy_header.as_deref().unwrap_or("Host")
    }
}

/// 執行中的回應器；`stop` 或 drop 時關閉並回收執行緒。
#[derive(Debug)]
pub struct Http01Server {
    addr: SocketAddr,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Http01Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// 登記一個待驗證的 token。
    pub fn add(&self, domain: &str, token: &str, key_authorization: &str) {
        if let Ok(mut tokens) = self.shared.tokens.write() {
            tokens.insert(
                token.to_string(),
                PendingChallenge {
                    domain: domain.to_string(),
                    key_authorization: key_authorization.to_string(),
                },
            );
        }
    }

    pub fn remove(&self, token: &str) {
        if let Ok(mut tokens) = self.shared.tokens.write() {
            tokens.remove(token);
        }
    }

    /// 停止接受連線並等待執行緒結束。
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::SeqCst);

        // 以一個自連線喚醒阻塞中的 accept
        let wake_ip = match self.addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        let _ = TcpStream::connect_timeout(&SocketAddr::new(wake_ip, self.addr.port()), WAKE_TIMEOUT);

        if handle.join().is_err() {
            warn!("HTTP-01 responder thread panicked");
        }
        debug!(addr = %self.addr, "HTTP-01 responder stopped");
    }
}

impl Drop for Http01Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 每個連線各用一個執行緒，慢速或閒置的客戶端不會擋住其他驗證請求。
fn serve(listener: TcpListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "HTTP-01 accept failed");
                continue;
            }
        };
        let conn_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("http-01-conn".to_string())
            .spawn(move || {
                if let Err(e) = handle_connection(stream, &conn_shared) {
                    debug!(error = %e, "HTTP-01 connection error");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn HTTP-01 connection thread");
        }
    }
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let response = match request.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let method = request.method.unwrap_or("");
                let path = request.path.unwrap_or("");
                let host_header = shared.host_header_name();
                let host = request
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case(host_header))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .map(|v| v.split(',').next().unwrap_or("").trim());

                match shared.lookup(method, path, host) {
                    Some(key_authorization) => {
                        info!(path, host = host.unwrap_or(""), "served HTTP-01 challenge");
                        let body = if method == "HEAD" { "" } else { key_authorization.as_str() };
                        render(200, "OK", body, key_authorization.len())
                    }
                    None => render(404, "Not Found", "", 0),
                }
            }
            Ok(httparse::Status::Partial) if buf.len() < MAX_REQUEST_SIZE => continue,
            _ => render(400, "Bad Request", "", 0),
        };
        stream.write_all(response.as_bytes())?;
        return stream.flush();
    }
}

fn render(status: u16, reason: &str, body: &str, content_length: usize) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status, reason, content_length, body
    )
}

/// 去除主機名稱中的連接埠，支援 `[::1]:80` 形式。
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
