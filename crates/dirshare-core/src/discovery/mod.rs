//! 局域网服务发现
//!
//! 扫描本机所在子网 (默认 /24) 中的每个地址：
//! 1. 在超时时间内尝试 TCP 连接目标端口，失败则静默丢弃
//! 2. 连接成功后发送 HTTP GET，只有响应中包含列表签名才算匹配
//!
//! 每个地址一个独立任务，整体耗时取决于单次探测超时，而不是地址数量。

use crate::listing::LISTING_SIGNATURE;
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_PREFIX_LEN: u8 = 24;
pub const DEFAULT_MAX_CONCURRENCY: usize = 256;

/// 只用于确定出站路由的本地地址，不会真正发送数据
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Could not determine local network address: {0}")]
    LocalAddress(#[from] io::Error),

    #[error("Local address is not IPv4: {0}")]
    NotIpv4(IpAddr),

    #[error("Unsupported prefix length /{0} (expected 16..=30)")]
    InvalidPrefix(u8),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// 扫描选项
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub port: u16,
    /// 单次连接/HTTP 探测超时
    pub timeout: Duration,
    /// 本地网络前缀长度
    pub prefix_len: u8,
    /// 同时进行的探测数量上限
    pub max_concurrency: usize,
    /// 整体扫描截止时间，超时后放弃未完成的探测
    pub deadline: Option<Duration>,
}

impl DiscoveryOptions {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: DEFAULT_PROBE_TIMEOUT,
            prefix_len: DEFAULT_PREFIX_LEN,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline: None,
        }
    }
}

/// 扫描结果：通过两次探测的地址集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub port: u16,
    pub addresses: BTreeSet<IpAddr>,
}

impl DiscoveryResult {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn socket_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addresses
            .iter()
            .map(move |ip| SocketAddr::new(*ip, self.port))
    }
}

/// 扫描回调接口，用于实时汇报发现的服务器
#[async_trait]
pub trait ScanCallback: Send + Sync {
    async fn on_server_found(&self, addr: SocketAddr);
}

pub struct Scanner {
    options: DiscoveryOptions,
    http: reqwest::Client,
}

impl Scanner {
    pub fn new(options: DiscoveryOptions) -> Result<Self, DiscoveryError> {
        if !(16..=30).contains(&options.prefix_len) {
            return Err(DiscoveryError::InvalidPrefix(options.prefix_len));
        }
        // 局域网地址不应经过系统代理
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.timeout)
            .no_proxy()
            .build()?;
        Ok(Self { options, http })
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// 扫描本机所在子网
    pub async fn scan(
        &self,
        callback: Option<Arc<dyn ScanCallback>>,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let local = local_ipv4()?;
        let hosts = subnet_hosts(local, self.options.prefix_len)?;
        info!(
            "Scanning {} hosts in {}/{} on port {}",
            hosts.len(),
            network_address(local, self.options.prefix_len),
            self.options.prefix_len,
            self.options.port
        );
        Ok(self
            .scan_hosts(hosts.into_iter().map(IpAddr::V4), callback)
            .await)
    }

    /// 扫描给定的地址列表
    pub async fn scan_hosts<I>(
        &self,
        hosts: I,
        callback: Option<Arc<dyn ScanCallback>>,
    ) -> DiscoveryResult
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let found = Arc::new(Mutex::new(BTreeSet::new()));
        let permits = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for ip in hosts {
            let addr = SocketAddr::new(ip, self.options.port);
            let http = self.http.clone();
            let timeout = self.options.timeout;
            let found = found.clone();
            let permits = permits.clone();
            let callback = callback.clone();

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if probe(&http, addr, timeout).await {
                    let inserted = found.lock().await.insert(addr.ip());
                    if inserted {
                        info!("Found listing server at {}", addr);
                        if let Some(cb) = callback {
                            cb.on_server_found(addr).await;
                        }
                    }
                }
            });
        }

        let drain = async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res
                    && e.is_panic()
                {
                    warn!("Probe task panicked: {}", e);
                }
            }
        };
        match self.options.deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, drain).await.is_err() {
                    warn!(
                        "Scan deadline of {:?} reached, abandoning outstanding probes",
                        deadline
                    );
                    tasks.abort_all();
                }
            }
            None => drain.await,
        }

        let addresses = found.lock().await.clone();
        info!("Scan complete: found {} server(s)", addresses.len());
        DiscoveryResult {
            port: self.options.port,
            addresses,
        }
    }
}

/// 单个地址的两阶段探测
async fn probe(http: &reqwest::Client, addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => drop(stream),
        Ok(Err(e)) => {
            trace!("{}: connect failed: {}", addr, e);
            return false;
        }
        Err(_) => {
            trace!("{}: connect timed out", addr);
            return false;
        }
    }

    debug!("{}: port open, verifying listing signature", addr);
    let response = match http.get(format!("http://{}/", addr)).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("{}: HTTP probe failed: {}", addr, e);
            return false;
        }
    };
    match response.text().await {
        Ok(body) => {
            let matched = body.contains(LISTING_SIGNATURE);
            if !matched {
                debug!("{}: responded without listing signature", addr);
            }
            matched
        }
        Err(e) => {
            debug!("{}: failed to read HTTP body: {}", addr, e);
            false
        }
    }
}

/// 本机的出站 IPv4 地址
///
/// UDP "连接" 只设置默认路由，不产生任何网络流量。
pub fn local_ipv4() -> Result<Ipv4Addr, DiscoveryError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE_ADDR)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        other => Err(DiscoveryError::NotIpv4(other)),
    }
}

fn mask(prefix_len: u8) -> u32 {
    u32::MAX << (32 - prefix_len as u32)
}

pub fn network_address(ip: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & mask(prefix_len))
}

/// 子网内除网络地址、广播地址和 `own` 之外的所有主机地址
pub fn subnet_hosts(own: Ipv4Addr, prefix_len: u8) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
    if !(16..=30).contains(&prefix_len) {
        return Err(DiscoveryError::InvalidPrefix(prefix_len));
    }
    let network = u32::from(own) & mask(prefix_len);
    let broadcast = network | !mask(prefix_len);
    Ok(((network + 1)..broadcast)
        .map(Ipv4Addr::from)
        .filter(|ip| *ip != own)
        .collect())
}
