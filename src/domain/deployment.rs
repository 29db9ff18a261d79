//! 部署任务领域模型

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::host::{ComponentType, DeployMethod};

/// 部署任务状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::CompletedWithErrors => "completed_with_errors",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed
                | DeploymentStatus::CompletedWithErrors
                | DeploymentStatus::Failed
        )
    }
}

/// 单台主机的部署结果
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

/// 请求中的组件描述
#[derive(Clone, Debug, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub method: DeployMethod,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub image: Option<String>,
    /// 覆盖模板参数
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// 创建部署任务请求
#[derive(Clone, Debug, Deserialize)]
pub struct DeploymentRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub host_ids: Vec<u64>,
    pub components: Vec<ComponentSpec>,
}

/// 创建时渲染完成的组件
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderedComponent {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub method: DeployMethod,
    pub port: u16,
    pub image: String,
    pub version: String,
    /// 二进制方式的发布包地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_url: Option<String>,
    #[serde(default)]
    pub binary_name: String,
    /// 服务运行账户
    #[serde(default)]
    pub service_user: String,
    /// 容器方式下的 compose 文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<String>,
    /// 二进制 / 服务管理方式下的 systemd unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_file: Option<String>,
    /// 该组件用到的配置文件名
    #[serde(default)]
    pub config_files: Vec<String>,
}

/// 单台主机的部署结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub host_id: u64,
    pub address: String,
    pub outcome: Outcome,
    pub message: String,
    #[serde(default)]
    pub deployed_files: Vec<String>,
    pub duration_ms: i64,
}

/// 部署任务快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentTask {
    pub id: String,
    pub name: String,
    pub host_ids: Vec<u64>,
    pub components: Vec<RenderedComponent>,
    /// 文件名 -> 渲染后的内容
    pub configs: BTreeMap<String, String>,
    pub status: DeploymentStatus,
    pub progress: u8,
    pub results: Vec<DeploymentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentTask {
    pub fn new(
        id: String,
        name: String,
        host_ids: Vec<u64>,
        components: Vec<RenderedComponent>,
        configs: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            name,
            host_ids,
            components,
            configs,
            status: DeploymentStatus::Pending,
            progress: 0,
            results: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 记录一台主机的结果，按输入主机顺序排列
    pub fn record_result(&mut self, result: DeploymentResult) {
        if self.status.is_terminal() {
            return;
        }
        let position = |host_id: u64| {
            self.host_ids
                .iter()
                .position(|id| *id == host_id)
                .unwrap_or(usize::MAX)
        };
        let at = position(result.host_id);
        let idx = self
            .results
            .iter()
            .position(|r| position(r.host_id) > at)
            .unwrap_or(self.results.len());
        self.results.insert(idx, result);

        if !self.host_ids.is_empty() {
            let pct = (self.results.len() * 100 / self.host_ids.len()).min(99) as u8;
            if pct > self.progress {
                self.progress = pct;
            }
        }
    }

    /// 根据结果汇总终态
    pub fn complete(&mut self) {
        let total = self.results.len();
        let failed = self.failed_count();

        if failed == 0 {
            self.finish(DeploymentStatus::Completed, None);
        } else {
            self.finish(
                DeploymentStatus::CompletedWithErrors,
                Some(format!("{} out of {} deployments failed", failed, total)),
            );
        }
    }

    /// 进入终态，进度置 100
    pub fn finish(&mut self, status: DeploymentStatus, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.error = error;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(host_id: u64, outcome: Outcome) -> DeploymentResult {
        DeploymentResult {
            host_id,
            address: format!("10.0.0.{}", host_id),
            outcome,
            message: String::new(),
            deployed_files: vec![],
            duration_ms: 0,
        }
    }

    fn task(hosts: Vec<u64>) -> DeploymentTask {
        let mut t = DeploymentTask::new(
            "d1".to_string(),
            "rollout".to_string(),
            hosts,
            vec![],
            BTreeMap::new(),
        );
        t.status = DeploymentStatus::Running;
        t
    }

    #[test]
    fn test_results_follow_host_order() {
        let mut t = task(vec![3, 1, 2]);
        t.record_result(result(2, Outcome::Success));
        t.record_result(result(3, Outcome::Success));
        t.record_result(result(1, Outcome::Success));

        let order: Vec<u64> = t.results.iter().map(|r| r.host_id).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(t.progress, 99);
    }

    #[test]
    fn test_all_success_is_completed() {
        let mut t = task(vec![1, 2]);
        t.record_result(result(1, Outcome::Success));
        t.record_result(result(2, Outcome::Success));
        t.complete();
        assert_eq!(t.status, DeploymentStatus::Completed);
        assert_eq!(t.progress, 100);
        assert!(t.error.is_none());
    }

    #[test]
    fn test_any_failure_is_completed_with_errors() {
        let mut t = task(vec![1, 2, 3]);
        t.record_result(result(1, Outcome::Success));
        t.record_result(result(2, Outcome::Failed));
        t.record_result(result(3, Outcome::Success));
        t.complete();
        assert_eq!(t.status, DeploymentStatus::CompletedWithErrors);
        assert_eq!(t.error.as_deref(), Some("1 out of 3 deployments failed"));
        assert_eq!(t.failed_count(), 1);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&DeploymentStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, "\"completed_with_errors\"");
    }
}
