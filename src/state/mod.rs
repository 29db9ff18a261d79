//! 运行时状态模块
//!
//! 管理应用状态、任务快照存储、事件通道和运行中任务登记

pub mod app_state;
pub mod event_hub;
pub mod task_registry;
pub mod task_store;

pub use app_state::AppState;
pub use event_hub::{EventHub, TaskEvent, TaskEventKind};
pub use task_registry::{TaskHandle, TaskRegistry};
pub use task_store::{MemoryTaskStore, StoreError, TaskStore};
