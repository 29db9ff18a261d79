//! 配置模板目录
//!
//! 以 handlebars 渲染组件的 compose / systemd unit / 配置文件。
//! 严格模式：模板引用了上下文中不存在的参数即视为渲染失败。

use handlebars::Handlebars;
use serde_json::Value;
use thiserror::Error;

use crate::domain::component::UnknownComponent;

/// 模板错误
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("failed to render template {template}: {message}")]
    Render { template: String, message: String },
}

impl From<UnknownComponent> for TemplateError {
    fn from(e: UnknownComponent) -> Self {
        TemplateError::UnknownComponent(e.0)
    }
}

/// 模板目录
pub trait TemplateCatalog: Send + Sync {
    /// 渲染已注册的模板
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError>;

    /// 渲染内联模板串
    fn render_str(&self, source: &str, context: &Value) -> Result<String, TemplateError>;

    fn has_template(&self, name: &str) -> bool;
}

/// handlebars 实现，内置全部组件模板
pub struct HandlebarsCatalog {
    registry: Handlebars<'static>,
}

impl HandlebarsCatalog {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);

        let mut catalog = Self { registry };
        for (name, source) in BUILTIN_TEMPLATES {
            catalog.register(name, source)?;
        }
        Ok(catalog)
    }

    /// 注册或覆盖模板
    pub fn register(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.registry
            .register_template_string(name, source)
            .map_err(|e| TemplateError::Render {
                template: name.to_string(),
                message: e.to_string(),
            })
    }
}

impl TemplateCatalog for HandlebarsCatalog {
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError> {
        if !self.registry.has_template(name) {
            return Err(TemplateError::UnknownTemplate(name.to_string()));
        }
        self.registry
            .render(name, context)
            .map_err(|e| TemplateError::Render {
                template: name.to_string(),
                message: e.to_string(),
            })
    }

    fn render_str(&self, source: &str, context: &Value) -> Result<String, TemplateError> {
        self.registry
            .render_template(source, context)
            .map_err(|e| TemplateError::Render {
                template: source.to_string(),
                message: e.to_string(),
            })
    }

    fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }
}

const BUILTIN_TEMPLATES: [(&str, &str); 13] = [
    ("systemd.service", SYSTEMD_UNIT),
    ("compose/node-exporter", COMPOSE_NODE_EXPORTER),
    ("compose/snmp-exporter", COMPOSE_SNMP_EXPORTER),
    ("compose/categraf", COMPOSE_CATEGRAF),
    ("compose/vmagent", COMPOSE_VMAGENT),
    ("compose/victoriametrics", COMPOSE_VICTORIAMETRICS),
    ("compose/grafana", COMPOSE_GRAFANA),
    ("compose/alertmanager", COMPOSE_ALERTMANAGER),
    ("snmp.yml", CONFIG_SNMP),
    ("config.toml", CONFIG_CATEGRAF),
    ("vmagent.yml", CONFIG_VMAGENT),
    ("grafana-datasource.yml", CONFIG_GRAFANA_DATASOURCE),
    ("alertmanager.yml", CONFIG_ALERTMANAGER),
];

const SYSTEMD_UNIT: &str = r#"[Unit]
Description={{description}}
Wants=network-online.target
After=network-online.target

[Service]
User={{service_user}}
Group={{service_user}}
Type=simple
ExecStart=/usr/local/bin/{{binary_name}} {{exec_args}}
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
"#;

const COMPOSE_NODE_EXPORTER: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    network_mode: host
    pid: host
    volumes:
      - /proc:/host/proc:ro
      - /sys:/host/sys:ro
      - /:/rootfs:ro
    command:
      - '--path.procfs=/host/proc'
      - '--path.sysfs=/host/sys'
      - '--path.rootfs=/rootfs'
      - '--web.listen-address=:{{port}}'
"#;

const COMPOSE_SNMP_EXPORTER: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    ports:
      - "{{port}}:9116"
    volumes:
      - {{config_dir}}/snmp.yml:/etc/snmp_exporter/snmp.yml:ro
    command:
      - '--config.file=/etc/snmp_exporter/snmp.yml'
"#;

const COMPOSE_CATEGRAF: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    network_mode: host
    volumes:
      - {{config_dir}}/config.toml:/etc/categraf/conf/config.toml:ro
      - /proc:/hostfs/proc:ro
      - /sys:/hostfs/sys:ro
"#;

const COMPOSE_VMAGENT: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    ports:
      - "{{port}}:8429"
    volumes:
      - {{config_dir}}/vmagent.yml:/etc/vmagent/vmagent.yml:ro
    command:
      - '-promscrape.config=/etc/vmagent/vmagent.yml'
      - '-remoteWrite.url={{remote_write_url}}'
"#;

const COMPOSE_VICTORIAMETRICS: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    ports:
      - "{{port}}:8428"
    volumes:
      - {{install_root}}/victoriametrics/data:/victoria-metrics-data
    command:
      - '-storageDataPath=/victoria-metrics-data'
      - '-retentionPeriod={{retention_period}}'
"#;

const COMPOSE_GRAFANA: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    ports:
      - "{{port}}:3000"
    environment:
      - GF_SECURITY_ADMIN_PASSWORD={{grafana_admin_password}}
    volumes:
      - {{config_dir}}/grafana-datasource.yml:/etc/grafana/provisioning/datasources/datasource.yml:ro
      - grafana-data:/var/lib/grafana
volumes:
  grafana-data:
"#;

const COMPOSE_ALERTMANAGER: &str = r#"version: '3.8'
services:
  {{name}}:
    image: {{image}}
    container_name: {{name}}
    restart: unless-stopped
    ports:
      - "{{port}}:9093"
    volumes:
      - {{config_dir}}/alertmanager.yml:/etc/alertmanager/alertmanager.yml:ro
    command:
      - '--config.file=/etc/alertmanager/alertmanager.yml'
"#;

const CONFIG_SNMP: &str = r#"auths:
  default:
    community: {{snmp_community}}
    version: 2
modules:
  if_mib:
    walk:
      - 1.3.6.1.2.1.2.2.1.2
      - 1.3.6.1.2.1.2.2.1.8
      - 1.3.6.1.2.1.31.1.1.1.6
      - 1.3.6.1.2.1.31.1.1.1.10
      - 1.3.6.1.2.1.31.1.1.1.15
    lookups:
      - source_indexes: [ifIndex]
        lookup: 1.3.6.1.2.1.2.2.1.2
        drop_source_indexes: false
    overrides:
      ifDescr:
        type: DisplayString
      ifOperStatus:
        type: gauge
      ifHCInOctets:
        type: counter64
      ifHCOutOctets:
        type: counter64
      ifHighSpeed:
        type: gauge
"#;

const CONFIG_CATEGRAF: &str = r#"[global]
print_configs = false
omit_hostname = false
interval = {{scrape_interval}}

[[writers]]
url = "{{remote_write_url}}"
timeout = 5000
dial_timeout = 2500
max_idle_conns_per_host = 100

[http]
enable = true
address = ":{{port}}"
"#;

const CONFIG_VMAGENT: &str = r#"global:
  scrape_interval: {{scrape_interval}}

scrape_configs:
  - job_name: 'node'
    static_configs:
      - targets: [{{#each scrape_targets}}'{{this}}'{{#unless @last}}, {{/unless}}{{/each}}]
"#;

const CONFIG_GRAFANA_DATASOURCE: &str = r#"apiVersion: 1

datasources:
  - name: VictoriaMetrics
    type: prometheus
    access: proxy
    url: {{victoriametrics_url}}
    isDefault: true
    editable: true
"#;

const CONFIG_ALERTMANAGER: &str = r#"global:
  resolve_timeout: 5m

route:
  receiver: 'default'
  group_by: ['alertname', 'instance']
  group_wait: 30s
  group_interval: 5m
  repeat_interval: 4h

receivers:
  - name: 'default'
    webhook_configs:
      - url: '{{webhook_url}}'
        send_resolved: true
"#;
