//! 环境变量配置加载

use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::domain::ssh::SshClientConfig;

/// 平台配置
///
/// 启动时构建一次，显式传递给所有组件
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// 服务监听端口
    pub port: u16,
    /// 实例标识（默认主机名）
    pub instance_id: String,
    /// 凭据加密密钥（base64 的 32 字节密钥，或任意口令）
    pub encryption_key: Option<String>,
    /// 扫描配置
    pub scan: ScanConfig,
    /// SSH 客户端配置
    pub ssh: SshClientConfig,
    /// 部署配置
    pub deploy: DeployConfig,
    /// 任务快照保留时间（小时）
    pub task_ttl_hours: i64,
}

/// 主机扫描配置
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// 并发探测数
    pub concurrency: usize,
    /// 单个任务允许的最大地址数
    pub max_addresses: usize,
    /// 是否使用 ICMP（系统 ping）判断可达性
    pub use_icmp: bool,
    /// 默认单次探测超时（秒）
    pub default_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::DEFAULT_SCAN_CONCURRENCY,
            max_addresses: constants::DEFAULT_MAX_SCAN_ADDRESSES,
            use_icmp: true,
            default_timeout_secs: constants::DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl ScanConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: parse_or("SCAN_CONCURRENCY", defaults.concurrency).max(1),
            max_addresses: parse_or("SCAN_MAX_ADDRESSES", defaults.max_addresses),
            use_icmp: flag_or("SCAN_USE_ICMP", defaults.use_icmp),
            default_timeout_secs: parse_or("SCAN_PROBE_TIMEOUT_SECS", defaults.default_timeout_secs),
        }
    }
}

/// 部署配置
#[derive(Clone, Debug)]
pub struct DeployConfig {
    /// 同一任务内并行处理的主机数
    pub concurrency: usize,
    /// 单台主机的部署超时（秒）
    pub host_timeout_secs: u64,
    /// 远端安装根目录
    pub install_root: String,
    /// 采集组件的 remote write 地址
    pub remote_write_url: String,
    /// VictoriaMetrics 地址（Grafana 数据源）
    pub victoriametrics_url: String,
    /// Grafana 管理员密码
    pub grafana_admin_password: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::DEFAULT_DEPLOY_CONCURRENCY,
            host_timeout_secs: constants::DEFAULT_DEPLOY_HOST_TIMEOUT_SECS,
            install_root: "/opt/monitoring".to_string(),
            remote_write_url: "http://victoriametrics:8428/api/v1/write".to_string(),
            victoriametrics_url: "http://victoriametrics:8428".to_string(),
            grafana_admin_password: "admin".to_string(),
        }
    }
}

impl DeployConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let grafana_admin_password = env::var("GRAFANA_ADMIN_PASSWORD")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                warn!("GRAFANA_ADMIN_PASSWORD not set, grafana deployments use the default password");
                defaults.grafana_admin_password.clone()
            });

        Self {
            concurrency: parse_or("DEPLOY_CONCURRENCY", defaults.concurrency).max(1),
            host_timeout_secs: parse_or("DEPLOY_HOST_TIMEOUT_SECS", defaults.host_timeout_secs),
            install_root: env::var("DEPLOY_INSTALL_ROOT").unwrap_or(defaults.install_root),
            remote_write_url: env::var("MONITORING_REMOTE_WRITE_URL")
                .unwrap_or(defaults.remote_write_url),
            victoriametrics_url: env::var("MONITORING_VICTORIAMETRICS_URL")
                .unwrap_or(defaults.victoriametrics_url),
            grafana_admin_password,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            instance_id: "netmon".to_string(),
            encryption_key: None,
            scan: ScanConfig::default(),
            ssh: SshClientConfig::default(),
            deploy: DeployConfig::default(),
            task_ttl_hours: constants::TASK_TTL_HOURS,
        }
    }
}

impl PlatformConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // Port - 兼容原 SERVER_PORT
        let port = load_with_fallback("PORT", "SERVER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let instance_id = env::var("NETMON_INSTANCE_ID").unwrap_or_else(|_| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });

        let encryption_key = env::var("PLATFORM_ENCRYPTION_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        Self {
            port,
            instance_id,
            encryption_key,
            scan: ScanConfig::from_env(),
            ssh: SshClientConfig::from_env(),
            deploy: DeployConfig::from_env(),
            task_ttl_hours: parse_or("TASK_TTL_HOURS", constants::TASK_TTL_HOURS),
        }
    }
}

/// 解析环境变量，缺失或无法解析时使用默认值
pub(crate) fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// 解析布尔开关（"1" / "true"）
pub(crate) fn flag_or(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 默认扫描并发数
    pub const DEFAULT_SCAN_CONCURRENCY: usize = 50;

    /// 单个任务最多扫描的地址数（一个 /16）
    pub const DEFAULT_MAX_SCAN_ADDRESSES: usize = 65_536;

    /// 默认探测超时（秒）
    pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

    /// 未指定端口时扫描的端口
    pub const DEFAULT_SSH_PORT: u16 = 22;

    /// 默认部署并发数
    pub const DEFAULT_DEPLOY_CONCURRENCY: usize = 5;

    /// 单台主机部署超时（秒）
    pub const DEFAULT_DEPLOY_HOST_TIMEOUT_SECS: u64 = 900; // 15 分钟

    /// 任务快照保留时间（小时）
    pub const TASK_TTL_HOURS: i64 = 24;

    /// 后台清理间隔（秒）
    pub const CLEANUP_INTERVAL_SECS: u64 = 300;

    /// 关闭时等待任务写完终态的时间（秒）
    pub const SHUTDOWN_GRACE_SECS: u64 = 10;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("NETMON_TEST_PRIMARY", "primary_value");
        env::set_var("NETMON_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("NETMON_TEST_PRIMARY", "NETMON_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("NETMON_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("NETMON_TEST_PRIMARY", "NETMON_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("NETMON_TEST_FALLBACK");
        assert_eq!(load_with_fallback("NETMON_TEST_PRIMARY", "NETMON_TEST_FALLBACK"), None);
    }

    #[test]
    fn test_parse_helpers() {
        env::set_var("NETMON_TEST_PARSE", " 42 ");
        assert_eq!(parse_or("NETMON_TEST_PARSE", 7usize), 42);
        env::set_var("NETMON_TEST_PARSE", "not-a-number");
        assert_eq!(parse_or("NETMON_TEST_PARSE", 7usize), 7);
        env::remove_var("NETMON_TEST_PARSE");

        env::set_var("NETMON_TEST_FLAG", "TRUE");
        assert!(flag_or("NETMON_TEST_FLAG", false));
        env::set_var("NETMON_TEST_FLAG", "0");
        assert!(!flag_or("NETMON_TEST_FLAG", true));
        env::remove_var("NETMON_TEST_FLAG");
    }
}
