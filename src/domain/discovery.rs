//! 主机发现任务领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 发现任务状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Running => "running",
            DiscoveryStatus::Completed => "completed",
            DiscoveryStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscoveryStatus::Completed | DiscoveryStatus::Failed)
    }
}

/// 端口参数：逗号分隔的字符串或显式列表
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum PortsInput {
    Text(String),
    List(Vec<i64>),
}

impl Default for PortsInput {
    fn default() -> Self {
        PortsInput::Text(String::new())
    }
}

/// 创建发现任务请求
#[derive(Clone, Debug, Deserialize)]
pub struct DiscoverySpec {
    /// 为空时按地址范围生成
    #[serde(default)]
    pub name: String,
    /// CIDR / start-end / 单地址
    pub ip_range: String,
    #[serde(default)]
    pub ports: PortsInput,
    /// 单次探测超时（秒），缺省取配置
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub credential_id: Option<u64>,
}

/// 发现任务快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryTask {
    pub id: String,
    pub name: String,
    pub ip_range: String,
    pub ports: Vec<u16>,
    pub timeout_secs: u64,
    pub credential_id: Option<u64>,
    pub status: DiscoveryStatus,
    /// 0-100，单调不减
    pub progress: u8,
    pub total_hosts: u32,
    pub found_hosts: u32,
    pub online_hosts: u32,
    pub failed_hosts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DiscoveryTask {
    pub fn new(
        id: String,
        name: String,
        ip_range: String,
        ports: Vec<u16>,
        timeout_secs: u64,
        credential_id: Option<u64>,
    ) -> Self {
        Self {
            id,
            name,
            ip_range,
            ports,
            timeout_secs,
            credential_id,
            status: DiscoveryStatus::Pending,
            progress: 0,
            total_hosts: 0,
            found_hosts: 0,
            online_hosts: 0,
            failed_hosts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 更新进度，终态前最多到 99
    pub fn advance(&mut self, processed: u32) {
        if self.status.is_terminal() || self.total_hosts == 0 {
            return;
        }
        let pct = (processed as u64 * 100 / self.total_hosts as u64).min(99) as u8;
        if pct > self.progress {
            self.progress = pct;
        }
    }

    /// 进入终态，进度置 100
    pub fn finish(&mut self, status: DiscoveryStatus, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.error = error;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DiscoveryTask {
        DiscoveryTask::new(
            "t1".to_string(),
            "lab".to_string(),
            "10.0.0.0/30".to_string(),
            vec![22],
            5,
            None,
        )
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut t = task();
        t.status = DiscoveryStatus::Running;
        t.total_hosts = 4;

        t.advance(2);
        assert_eq!(t.progress, 50);
        t.advance(1);
        assert_eq!(t.progress, 50);
        t.advance(4);
        assert_eq!(t.progress, 99);

        t.finish(DiscoveryStatus::Completed, None);
        assert_eq!(t.progress, 100);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_spec_name_is_optional() {
        let spec: DiscoverySpec =
            serde_json::from_str(r#"{"ip_range":"10.0.0.0/30","ports":[22,80]}"#).unwrap();
        assert!(spec.name.is_empty());
        assert!(matches!(spec.ports, PortsInput::List(ref p) if p == &vec![22, 80]));
    }

    #[test]
    fn test_terminal_task_is_immutable() {
        let mut t = task();
        t.finish(DiscoveryStatus::Failed, Some("cancelled".to_string()));
        t.finish(DiscoveryStatus::Completed, None);
        assert_eq!(t.status, DiscoveryStatus::Failed);
        assert_eq!(t.error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_ports_input_accepts_both_shapes() {
        let spec: DiscoverySpec =
            serde_json::from_str(r#"{"name":"a","ip_range":"10.0.0.1","ports":"22,9100"}"#)
                .unwrap();
        assert!(matches!(spec.ports, PortsInput::Text(ref s) if s == "22,9100"));

        let spec: DiscoverySpec =
            serde_json::from_str(r#"{"name":"a","ip_range":"10.0.0.1","ports":[22,80]}"#)
                .unwrap();
        assert!(matches!(spec.ports, PortsInput::List(ref v) if v == &vec![22, 80]));
    }
}
