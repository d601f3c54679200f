//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod container;
pub mod tunnel;

// Re-exports for convenience
pub use container::{ContainerEvent, ContainerRecord, ContainersResponse, PublishedPort};
pub use tunnel::{ExposeRequest, TunnelLogRecord, TunnelState, TunnelStatus};
