//! 监控组件目录
//!
//! 可部署组件是固定的集合，名称在入口处一次性解析为 `ComponentKind`

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use super::host::ComponentType;

/// 未知组件名
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownComponent(pub String);

impl fmt::Display for UnknownComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown component: {}", self.0)
    }
}

impl std::error::Error for UnknownComponent {}

/// 可部署组件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    NodeExporter,
    SnmpExporter,
    Categraf,
    VmAgent,
    VictoriaMetrics,
    Grafana,
    Alertmanager,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::NodeExporter,
        ComponentKind::SnmpExporter,
        ComponentKind::Categraf,
        ComponentKind::VmAgent,
        ComponentKind::VictoriaMetrics,
        ComponentKind::Grafana,
        ComponentKind::Alertmanager,
    ];

    pub fn as_str(&self) -> &'static str {
        self.definition().name
    }

    /// 组件的静态定义
    pub fn definition(&self) -> &'static ComponentDefinition {
        match self {
            ComponentKind::NodeExporter => &NODE_EXPORTER,
            ComponentKind::SnmpExporter => &SNMP_EXPORTER,
            ComponentKind::Categraf => &CATEGRAF,
            ComponentKind::VmAgent => &VMAGENT,
            ComponentKind::VictoriaMetrics => &VICTORIAMETRICS,
            ComponentKind::Grafana => &GRAFANA,
            ComponentKind::Alertmanager => &ALERTMANAGER,
        }
    }

    /// 目录自带的模板参数
    pub fn default_params(&self) -> Map<String, Value> {
        let def = self.definition();
        let mut params = Map::new();
        params.insert("name".into(), json!(def.name));
        params.insert("version".into(), json!(def.version));
        params.insert("binary_name".into(), json!(def.binary_name));
        params.insert("exec_args".into(), json!(def.exec_args));
        params.insert("description".into(), json!(def.description));
        params.insert("service_user".into(), json!(def.name.replace('-', "_")));

        match self {
            ComponentKind::SnmpExporter => {
                params.insert("snmp_community".into(), json!("public"));
            }
            ComponentKind::VmAgent => {
                params.insert("scrape_interval".into(), json!("15s"));
                params.insert("scrape_targets".into(), json!([]));
            }
            ComponentKind::Categraf => {
                params.insert("scrape_interval".into(), json!(15));
            }
            ComponentKind::VictoriaMetrics => {
                params.insert("retention_period".into(), json!("30d"));
            }
            ComponentKind::Alertmanager => {
                params.insert("webhook_url".into(), json!("http://localhost:5001/alerts"));
            }
            _ => {}
        }
        params
    }
}

impl FromStr for ComponentKind {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        ComponentKind::ALL
            .into_iter()
            .find(|k| k.definition().name == normalized)
            .ok_or_else(|| UnknownComponent(s.to_string()))
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 组件静态定义
#[derive(Debug)]
pub struct ComponentDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub component_type: ComponentType,
    pub default_port: u16,
    pub image: &'static str,
    pub version: &'static str,
    /// 二进制发布包地址
    pub binary_url: &'static str,
    /// 发布包中的可执行文件名
    pub binary_name: &'static str,
    /// systemd ExecStart 参数
    pub exec_args: &'static str,
    pub compose_template: &'static str,
    pub unit_template: &'static str,
    /// 配置模板名，渲染结果以模板名作为文件名
    pub config_templates: &'static [&'static str],
}

pub const UNIT_TEMPLATE: &str = "systemd.service";

static NODE_EXPORTER: ComponentDefinition = ComponentDefinition {
    name: "node-exporter",
    description: "Prometheus Node Exporter",
    component_type: ComponentType::Collector,
    default_port: 9100,
    image: "prom/node-exporter:latest",
    version: "1.7.0",
    binary_url: "https://github.com/prometheus/node_exporter/releases/download/v1.7.0/node_exporter-1.7.0.linux-amd64.tar.gz",
    binary_name: "node_exporter",
    exec_args: "--web.listen-address=:{{port}}",
    compose_template: "compose/node-exporter",
    unit_template: UNIT_TEMPLATE,
    config_templates: &[],
};

static SNMP_EXPORTER: ComponentDefinition = ComponentDefinition {
    name: "snmp-exporter",
    description: "Prometheus SNMP Exporter",
    component_type: ComponentType::Collector,
    default_port: 9116,
    image: "prom/snmp-exporter:latest",
    version: "0.25.0",
    binary_url: "https://github.com/prometheus/snmp_exporter/releases/download/v0.25.0/snmp_exporter-0.25.0.linux-amd64.tar.gz",
    binary_name: "snmp_exporter",
    exec_args: "--config.file={{config_dir}}/snmp.yml --web.listen-address=:{{port}}",
    compose_template: "compose/snmp-exporter",
    unit_template: UNIT_TEMPLATE,
    config_templates: &["snmp.yml"],
};

static CATEGRAF: ComponentDefinition = ComponentDefinition {
    name: "categraf",
    description: "Categraf Collector",
    component_type: ComponentType::Collector,
    default_port: 9101,
    image: "flashcatcloud/categraf:latest",
    version: "0.3.60",
    binary_url: "https://github.com/flashcatcloud/categraf/releases/download/v0.3.60/categraf-v0.3.60-linux-amd64.tar.gz",
    binary_name: "categraf",
    exec_args: "--configs {{config_dir}}",
    compose_template: "compose/categraf",
    unit_template: UNIT_TEMPLATE,
    config_templates: &["config.toml"],
};

static VMAGENT: ComponentDefinition = ComponentDefinition {
    name: "vmagent",
    description: "VictoriaMetrics Agent",
    component_type: ComponentType::Collector,
    default_port: 8429,
    image: "victoriametrics/vmagent:latest",
    version: "1.96.0",
    binary_url: "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download/v1.96.0/vmutils-linux-amd64-v1.96.0.tar.gz",
    binary_name: "vmagent-prod",
    exec_args: "-promscrape.config={{config_dir}}/vmagent.yml -remoteWrite.url={{remote_write_url}} -httpListenAddr=:{{port}}",
    compose_template: "compose/vmagent",
    unit_template: UNIT_TEMPLATE,
    config_templates: &["vmagent.yml"],
};

static VICTORIAMETRICS: ComponentDefinition = ComponentDefinition {
    name: "victoriametrics",
    description: "VictoriaMetrics",
    component_type: ComponentType::Storage,
    default_port: 8428,
    image: "victoriametrics/victoria-metrics:latest",
    version: "1.96.0",
    binary_url: "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download/v1.96.0/victoria-metrics-linux-amd64-v1.96.0.tar.gz",
    binary_name: "victoria-metrics-prod",
    exec_args: "-storageDataPath={{install_root}}/victoriametrics/data -retentionPeriod={{retention_period}} -httpListenAddr=:{{port}}",
    compose_template: "compose/victoriametrics",
    unit_template: UNIT_TEMPLATE,
    config_templates: &[],
};

static GRAFANA: ComponentDefinition = ComponentDefinition {
    name: "grafana",
    description: "Grafana",
    component_type: ComponentType::Visualization,
    default_port: 3000,
    image: "grafana/grafana:latest",
    version: "10.2.3",
    binary_url: "https://dl.grafana.com/oss/release/grafana-10.2.3.linux-amd64.tar.gz",
    binary_name: "grafana",
    exec_args: "server --homepath /usr/share/grafana",
    compose_template: "compose/grafana",
    unit_template: UNIT_TEMPLATE,
    config_templates: &["grafana-datasource.yml"],
};

static ALERTMANAGER: ComponentDefinition = ComponentDefinition {
    name: "alertmanager",
    description: "Prometheus Alertmanager",
    component_type: ComponentType::Alerting,
    default_port: 9093,
    image: "prom/alertmanager:latest",
    version: "0.26.0",
    binary_url: "https://github.com/prometheus/alertmanager/releases/download/v0.26.0/alertmanager-0.26.0.linux-amd64.tar.gz",
    binary_name: "alertmanager",
    exec_args: "--config.file={{config_dir}}/alertmanager.yml --web.listen-address=:{{port}}",
    compose_template: "compose/alertmanager",
    unit_template: UNIT_TEMPLATE,
    config_templates: &["alertmanager.yml"],
};
