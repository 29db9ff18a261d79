//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod component;
pub mod credential;
pub mod deployment;
pub mod discovery;
pub mod host;
pub mod ssh;

// Re-exports for convenience
pub use component::{ComponentDefinition, ComponentKind, UnknownComponent};
pub use credential::{Credential, NewCredential};
pub use deployment::{
    ComponentSpec, DeploymentRequest, DeploymentResult, DeploymentStatus, DeploymentTask,
    Outcome, RenderedComponent,
};
pub use discovery::{DiscoverySpec, DiscoveryStatus, DiscoveryTask, PortsInput};
pub use host::{
    AuthType, ComponentStatus, ComponentType, DeployMethod, DeployedComponent, DiscoveryMethod,
    Host, HostAuth, HostFacts, HostStatus,
};
pub use ssh::{CommandOutput, HostKeyPolicy, SshAuth, SshClientConfig, SshTarget};
