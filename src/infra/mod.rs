//! 基础设施模块
//!
//! 封装外部依赖（SSH 客户端、本地命令执行、模板渲染、主机目录等）

pub mod command;
pub mod host_directory;
pub mod known_hosts;
pub mod ssh;
pub mod templates;

pub use command::CommandRunner;
pub use host_directory::{HostDirectory, MemoryHostDirectory};
pub use known_hosts::KnownHosts;
pub use ssh::{RemoteConnector, RemoteSession, SshConnector};
pub use templates::{HandlebarsCatalog, TemplateCatalog};
