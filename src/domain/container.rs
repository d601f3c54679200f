//! 容器相关领域模型

use serde::{Deserialize, Serialize};

/// 容器发布的端口
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPort {
    /// 映射到宿主机的公开端口；没有映射时为 None
    pub public_port: Option<u16>,
    /// 协议类型（tcp / udp）
    pub protocol_type: String,
}

/// 容器信息
///
/// `names` 第一个元素是规范显示名；部分来源（如 inspect 输出）带 `/` 前缀，
/// 展示时去掉。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub status: String,
    pub ports: Vec<PublishedPort>,
}

impl ContainerRecord {
    /// 规范显示名（去掉 `/` 前缀）
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.strip_prefix('/').unwrap_or(n))
            .unwrap_or("")
    }

    /// 是否存在至少一个已映射的公开端口
    pub fn is_exposable(&self) -> bool {
        self.ports.iter().any(|p| p.public_port.is_some())
    }

    /// 是否发布了指定的公开端口
    pub fn publishes(&self, port: u16) -> bool {
        self.ports.iter().any(|p| p.public_port == Some(port))
    }
}

/// 容器生命周期事件（start / destroy）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub action: String,
    pub name: String,
    pub id: String,
}

/// 容器列表响应
#[derive(Debug, Serialize)]
pub struct ContainersResponse {
    pub containers: Vec<ContainerRecord>,
    pub total: usize,
}
