//! 基础设施模块
//!
//! 封装外部依赖（docker 命令行）

pub mod docker;

pub use docker::{ContainerRuntime, DockerCli};
