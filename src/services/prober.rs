//! 主机探测
//!
//! 固定大小的并发池逐个地址探测：先判断可达，再对每个端口做 TCP 连接测试。
//! 每个可达主机的后续处理（信息采集、入库）由观察者在同一个 worker 内完成。

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infra::command::{CommandError, CommandRunner};

/// TCP 方式判断可达性时尝试的端口
const FALLBACK_REACH_PORTS: [u16; 4] = [22, 80, 443, 3389];

/// 单个地址的探测结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeResult {
    pub address: IpAddr,
    pub reachable: bool,
    pub open_ports: Vec<u16>,
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    pub fn has_open_port(&self, port: u16) -> bool {
        self.open_ports.contains(&port)
    }
}

/// 探测原语
#[async_trait]
pub trait Probe: Send + Sync {
    /// 可达时返回往返时延
    async fn reachable(&self, ip: IpAddr, timeout: Duration) -> Option<Duration>;

    async fn port_open(&self, ip: IpAddr, port: u16, timeout: Duration) -> bool;
}

/// 系统探测：ICMP 使用系统 ping，否则用 TCP 连接判断
pub struct SystemProbe {
    use_icmp: bool,
}

impl SystemProbe {
    pub fn new(use_icmp: bool) -> Self {
        Self { use_icmp }
    }

    async fn ping(&self, ip: IpAddr, timeout: Duration) -> Result<bool, CommandError> {
        let wait = timeout.as_secs().max(1).to_string();
        let addr = ip.to_string();
        let mut args = vec!["-c", "1", "-W", wait.as_str()];
        if ip.is_ipv6() {
            args.insert(0, "-6");
        }
        args.push(addr.as_str());

        let output =
            CommandRunner::run_simple("ping", &args, timeout + Duration::from_secs(1))
                .await?;
        Ok(output.status.success())
    }

    /// 连接被拒绝同样说明主机在线
    async fn tcp_reachable(&self, ip: IpAddr, timeout: Duration) -> bool {
        for port in FALLBACK_REACH_PORTS {
            let addr = SocketAddr::new(ip, port);
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => return true,
                _ => continue,
            }
        }
        false
    }
}

#[async_trait]
impl Probe for SystemProbe {
    async fn reachable(&self, ip: IpAddr, timeout: Duration) -> Option<Duration> {
        let started = Instant::now();

        let reachable = if self.use_icmp {
            match self.ping(ip, timeout).await {
                Ok(ok) => ok,
                Err(CommandError::SpawnFailed(e)) => {
                    warn!(error = %e, "ping unavailable, falling back to TCP reachability");
                    self.tcp_reachable(ip, timeout).await
                }
                Err(CommandError::Timeout) => false,
            }
        } else {
            self.tcp_reachable(ip, timeout).await
        };

        reachable.then(|| started.elapsed())
    }

    async fn port_open(&self, ip: IpAddr, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(SocketAddr::new(ip, port))).await,
            Ok(Ok(_))
        )
    }
}

/// 扫描计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScanCounters {
    pub total: u32,
    /// 已处理地址数
    pub processed: u32,
    /// 可达主机
    pub found: u32,
    /// 至少一个端口开放
    pub online: u32,
    /// 后续处理失败
    pub failed: u32,
}

/// 扫描回调
#[async_trait]
pub trait ScanObserver: Send + Sync {
    /// 可达主机的后续处理，在探测它的 worker 内执行；返回 false 计入失败
    async fn on_host(&self, result: &ProbeResult) -> bool;

    /// 计数更新后调用（持有计数锁，调用顺序与计数一致）
    async fn on_progress(&self, counters: ScanCounters);
}

/// 并发探测器
pub struct HostProber {
    probe: Arc<dyn Probe>,
    concurrency: usize,
}

impl HostProber {
    pub fn new(probe: Arc<dyn Probe>, concurrency: usize) -> Self {
        Self {
            probe,
            concurrency: concurrency.max(1),
        }
    }

    /// 探测单个地址
    pub async fn probe_host(&self, ip: IpAddr, ports: &[u16], timeout: Duration) -> ProbeResult {
        let Some(latency) = self.probe.reachable(ip, timeout).await else {
            return ProbeResult {
                address: ip,
                reachable: false,
                open_ports: Vec::new(),
                latency_ms: None,
            };
        };

        let mut open_ports = Vec::new();
        for &port in ports {
            if self.probe.port_open(ip, port, timeout).await {
                open_ports.push(port);
            }
        }

        ProbeResult {
            address: ip,
            reachable: true,
            open_ports,
            latency_ms: Some(latency.as_millis() as u64),
        }
    }

    /// 扫描全部地址；取消后不再启动新的探测，返回当时的计数
    pub async fn scan(
        &self,
        addresses: Vec<IpAddr>,
        ports: &[u16],
        timeout: Duration,
        cancel: &CancellationToken,
        observer: &dyn ScanObserver,
    ) -> ScanCounters {
        let counters = Mutex::new(ScanCounters {
            total: addresses.len() as u32,
            ..Default::default()
        });

        futures::stream::iter(addresses)
            .map(|ip| {
                let counters = &counters;
                async move {
                    let result = self.probe_host(ip, ports, timeout).await;
                    let handled = if result.reachable {
                        debug!(
                            host = %ip,
                            open_ports = ?result.open_ports,
                            latency_ms = ?result.latency_ms,
                            "Host reachable"
                        );
                        observer.on_host(&result).await
                    } else {
                        true
                    };

                    let mut c = counters.lock().await;
                    c.processed += 1;
                    if result.reachable {
                        c.found += 1;
                        if !result.open_ports.is_empty() {
                            c.online += 1;
                        }
                    }
                    if !handled {
                        c.failed += 1;
                    }
                    observer.on_progress(*c).await;
                }
            })
            .buffer_unordered(self.concurrency)
            .take_until(cancel.cancelled())
            .collect::<Vec<()>>()
            .await;

        let final_counts = *counters.lock().await;
        final_counts
    }
}
