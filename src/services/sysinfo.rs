//! 主机信息采集
//!
//! 一次 SSH 连接内执行固定的只读命令；单条命令失败只影响对应字段

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::host::HostFacts;
use crate::domain::ssh::SshTarget;
use crate::infra::ssh::{RemoteConnector, RemoteSession, SshError};

pub struct SystemInfoCollector {
    connector: Arc<dyn RemoteConnector>,
    command_timeout: Duration,
}

impl SystemInfoCollector {
    pub fn new(connector: Arc<dyn RemoteConnector>, command_timeout: Duration) -> Self {
        Self {
            connector,
            command_timeout,
        }
    }

    /// 采集主机信息；只有建立连接失败才返回错误
    pub async fn collect(&self, target: &SshTarget) -> Result<HostFacts, SshError> {
        let mut session = self.connector.connect(target).await?;

        let mut facts = HostFacts {
            hostname: self.run(session.as_ref(), "hostname", parse_hostname).await,
            cpu_cores: self.run(session.as_ref(), "nproc", parse_nproc).await,
            memory_mb: self.run(session.as_ref(), "free -m", parse_free_mb).await,
            disk_gb: self.run(session.as_ref(), "df -BG /", parse_df_gb).await,
            ..Default::default()
        };

        if let Some((os, version, arch)) = self.run(session.as_ref(), "uname -srm", parse_uname).await {
            facts.os = Some(os);
            facts.os_version = Some(version);
            facts.arch = Some(arch);
        }

        session.close().await;

        debug!(host = %target.address, facts = ?facts, "Collected system info");
        Ok(facts)
    }

    async fn run<T>(
        &self,
        session: &dyn RemoteSession,
        command: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        match session.exec(command, self.command_timeout).await {
            Ok(output) if output.success() => parse(&output.stdout),
            Ok(output) => {
                debug!(command = %command, reason = %output.diagnostic(), "Info command failed");
                None
            }
            Err(e) => {
                debug!(command = %command, error = %e, "Info command failed");
                None
            }
        }
    }
}

fn parse_hostname(out: &str) -> Option<String> {
    let name = out.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// `Linux 5.15.0-91-generic x86_64` -> (os, version, arch)
fn parse_uname(out: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = out.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let os = parts[0].to_string();
    let arch = parts[parts.len() - 1].to_string();
    let version = parts[1..parts.len() - 1].join(" ");
    Some((os, version, arch))
}

fn parse_nproc(out: &str) -> Option<u32> {
    out.trim().parse().ok().filter(|n| *n > 0)
}

/// `free -m` 中 `Mem:` 行的 total 列
fn parse_free_mb(out: &str) -> Option<u64> {
    out.lines()
        .find(|l| l.trim_start().starts_with("Mem:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

/// `df -BG /` 最后一行的 size 列（如 `40G`）
fn parse_df_gb(out: &str) -> Option<u64> {
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .last()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.trim_end_matches('G').parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ssh::SshAuth;
    use crate::testing::{ScriptedConnector, ScriptedHost};

    const FREE: &str = "              total        used        free      shared  buff/cache   available
Mem:           7821        2113         512          41        5195        5380
Swap:          2047           0        2047
";

    const DF: &str = "Filesystem     1G-blocks  Used Available Use% Mounted on
/dev/sda1            40G   12G       27G  31% /
";

    #[test]
    fn test_parsers() {
        assert_eq!(parse_hostname("db-01\n"), Some("db-01".to_string()));
        assert_eq!(parse_hostname("  \n"), None);
        assert_eq!(
            parse_uname("Linux 5.15.0-91-generic x86_64\n"),
            Some((
                "Linux".to_string(),
                "5.15.0-91-generic".to_string(),
                "x86_64".to_string()
            ))
        );
        assert_eq!(parse_uname("Linux"), None);
        assert_eq!(parse_nproc("8\n"), Some(8));
        assert_eq!(parse_nproc("zero"), None);
        assert_eq!(parse_free_mb(FREE), Some(7821));
        assert_eq!(parse_df_gb(DF), Some(40));
    }

    fn target() -> SshTarget {
        SshTarget {
            address: "10.0.0.5".to_string(),
            port: 22,
            username: "root".to_string(),
            auth: SshAuth::Password("pw".to_string()),
        }
    }

    #[tokio::test]
    async fn test_failed_command_leaves_field_unset() {
        let host = ScriptedHost::new()
            .respond("hostname", "db-01\n")
            .respond("uname -srm", "Linux 6.1.0 aarch64\n")
            .fail("nproc", "nproc: not found")
            .respond("free -m", FREE)
            .respond("df -BG /", DF);
        let connector = ScriptedConnector::new().host("10.0.0.5", host.clone());
        let collector = SystemInfoCollector::new(Arc::new(connector), Duration::from_secs(1));

        let facts = collector.collect(&target()).await.unwrap();
        assert_eq!(facts.hostname.as_deref(), Some("db-01"));
        assert_eq!(facts.arch.as_deref(), Some("aarch64"));
        assert_eq!(facts.cpu_cores, None);
        assert_eq!(facts.memory_mb, Some(7821));
        assert_eq!(facts.disk_gb, Some(40));
        assert_eq!(host.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let collector = SystemInfoCollector::new(
            Arc::new(ScriptedConnector::new()),
            Duration::from_secs(1),
        );
        assert!(collector.collect(&target()).await.is_err());
    }
}
