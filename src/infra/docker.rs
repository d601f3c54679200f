//! Docker CLI 封装
//!
//! 通过 `ContainerRuntime` trait 抽象容器运行时，核心逻辑在测试里可以换成
//! 脚本化实现，不需要真实的 docker。

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::container::{ContainerEvent, ContainerRecord, PublishedPort};

/// docker ps 输出模板，`|` 分隔
const PS_FORMAT: &str = "{{.ID}}|{{.Names}}|{{.Image}}|{{.Status}}|{{.Ports}}";

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 隧道 sidecar 启动参数
#[derive(Clone, Debug)]
pub struct TunnelLaunchSpec {
    /// 会话容器名，每个会话唯一
    pub name: String,
    /// 要暴露的目标端口
    pub port: u16,
    /// 认证凭据，只进 sidecar 进程环境
    pub credential: String,
    /// sidecar 镜像
    pub image: String,
    /// 凭据注入到 sidecar 的环境变量名
    pub credential_env: String,
}

/// 一次日志抓取的结果，stdout / stderr 分离
#[derive(Clone, Debug, Default)]
pub struct LogStreams {
    pub stdout: String,
    pub stderr: String,
}

/// 容器运行时调用错误
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

/// 容器运行时接口
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 启动隧道 sidecar 容器
    async fn launch_tunnel(&self, spec: &TunnelLaunchSpec) -> Result<(), DockerError>;

    /// 抓取容器自启动以来的全部日志（累积式，非增量）
    async fn fetch_logs(&self, name: &str) -> Result<LogStreams, DockerError>;

    /// 强制移除容器；容器已不存在视为成功
    async fn remove_container(&self, name: &str) -> Result<(), DockerError>;

    /// 列出所有容器
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, DockerError>;

    /// 订阅容器 start/destroy 事件流
    async fn container_events(&self) -> Result<mpsc::Receiver<ContainerEvent>, DockerError>;
}

/// 基于 docker 命令行的运行时实现
pub struct DockerCli {
    docker_path: String,
}

impl DockerCli {
    pub fn new(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, DockerError> {
        Command::new(&self.docker_path)
            .args(args)
            .output()
            .await
            .map_err(|e| DockerError::Spawn {
                command: format!("docker {}", args.first().unwrap_or(&"")),
                source: e,
            })
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn launch_tunnel(&self, spec: &TunnelLaunchSpec) -> Result<(), DockerError> {
        let port_arg = spec.port.to_string();
        // 凭据走子进程环境：`--env KEY` 不带值，docker 从自身环境继承，
        // 凭据不会出现在命令行参数里
        let output = Command::new(&self.docker_path)
            .args(["run", "-d", "--name", spec.name.as_str()])
            .args(["--net", "host", "--env", spec.credential_env.as_str()])
            .env(&spec.credential_env, &spec.credential)
            .args([
                spec.image.as_str(),
                "http",
                port_arg.as_str(),
                "--log",
                "stdout",
                "--log-format",
                "json",
            ])
            .output()
            .await
            .map_err(|e| DockerError::Spawn {
                command: "docker run".to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(DockerError::CommandFailed {
                command: "docker run".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(container = %spec.name, port = spec.port, "Tunnel sidecar launched");
        Ok(())
    }

    async fn fetch_logs(&self, name: &str) -> Result<LogStreams, DockerError> {
        let output = self.run(&["logs", name]).await?;

        if !output.status.success() {
            return Err(DockerError::CommandFailed {
                command: format!("docker logs {}", name),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(LogStreams {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn remove_container(&self, name: &str) -> Result<(), DockerError> {
        let output = self.run(&["rm", "-f", name]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // 会话可能在失败后已经自行退出并被清掉
            if stderr.contains("No such container") {
                return Ok(());
            }
            return Err(DockerError::CommandFailed {
                command: format!("docker rm -f {}", name),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, DockerError> {
        let output = self.run(&["ps", "--format", PS_FORMAT]).await?;

        if !output.status.success() {
            return Err(DockerError::CommandFailed {
                command: "docker ps".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn container_events(&self) -> Result<mpsc::Receiver<ContainerEvent>, DockerError> {
        let mut child = Command::new(&self.docker_path)
            .args([
                "events",
                "--filter",
                "type=container",
                "--filter",
                "event=start",
                "--filter",
                "event=destroy",
                "--format",
                "{{json .}}",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DockerError::Spawn {
                command: "docker events".to_string(),
                source: e,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DockerError::CommandFailed {
            command: "docker events".to_string(),
            stderr: "stdout pipe missing".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_event_line(&line) {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(line = %line, "Skipping unparseable docker event line"),
                }
            }
            // 订阅方退出或流断开，连带结束 docker events 进程
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill docker events process");
            }
            let _ = child.wait().await;
            debug!("docker events stream closed");
        });

        Ok(rx)
    }
}

/// 解析 docker ps 的多行输出
fn parse_ps_output(stdout: &str) -> Vec<ContainerRecord> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(parse_ps_line)
        .collect()
}

/// 解析一行 `|` 分隔的 docker ps 输出
fn parse_ps_line(line: &str) -> ContainerRecord {
    let parts: Vec<&str> = line.split('|').collect();
    ContainerRecord {
        id: parts.first().unwrap_or(&"").to_string(),
        names: parts
            .get(1)
            .unwrap_or(&"")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        image: parts.get(2).unwrap_or(&"").to_string(),
        status: parts.get(3).unwrap_or(&"").to_string(),
        ports: parse_port_specs(parts.get(4).unwrap_or(&"")),
    }
}

/// 解析 docker ps 的 Ports 字段
fn parse_port_specs(field: &str) -> Vec<PublishedPort> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(parse_port_spec)
        .collect()
}

/// 解析单个端口条目
///
/// 形如 `0.0.0.0:8080->80/tcp`、`:::8080->80/tcp`（映射）或 `443/tcp`（未映射）
fn parse_port_spec(spec: &str) -> Option<PublishedPort> {
    if let Some((public, private)) = spec.split_once("->") {
        let public_port = public.rsplit_once(':').and_then(|(_, p)| p.parse().ok());
        let protocol_type = private
            .rsplit_once('/')
            .map(|(_, proto)| proto)
            .unwrap_or("tcp")
            .to_string();
        Some(PublishedPort {
            public_port,
            protocol_type,
        })
    } else {
        let (_, proto) = spec.rsplit_once('/')?;
        Some(PublishedPort {
            public_port: None,
            protocol_type: proto.to_string(),
        })
    }
}

/// docker events --format '{{json .}}' 的单行结构
#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(default)]
    id: String,
    #[serde(rename = "Actor", default)]
    actor: RawActor,
}

#[derive(Deserialize, Default)]
struct RawActor {
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

/// 解析一行事件 JSON；非容器事件或坏行返回 None
fn parse_event_line(line: &str) -> Option<ContainerEvent> {
    let raw: RawEvent = serde_json::from_str(line.trim()).ok()?;
    if raw.kind != "container" {
        return None;
    }
    let name = raw
        .actor
        .attributes
        .get("name")
        .cloned()
        .unwrap_or_default();
    Some(ContainerEvent {
        action: raw.action,
        name,
        id: raw.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_spec_mapped() {
        let port = parse_port_spec("0.0.0.0:8080->80/tcp").unwrap();
        assert_eq!(port.public_port, Some(8080));
        assert_eq!(port.protocol_type, "tcp");
    }

    #[test]
    fn test_parse_port_spec_ipv6() {
        let port = parse_port_spec(":::8080->80/tcp").unwrap();
        assert_eq!(port.public_port, Some(8080));
    }

    #[test]
    fn test_parse_port_spec_unmapped() {
        let port = parse_port_spec("443/tcp").unwrap();
        assert_eq!(port.public_port, None);
        assert_eq!(port.protocol_type, "tcp");

        assert!(parse_port_spec("garbage").is_none());
    }

    #[test]
    fn test_parse_ps_line() {
        let record = parse_ps_line(
            "abc123|web|nginx:latest|Up 2 hours|0.0.0.0:8080->80/tcp, 443/tcp",
        );
        assert_eq!(record.id, "abc123");
        assert_eq!(record.names, vec!["web".to_string()]);
        assert_eq!(record.image, "nginx:latest");
        assert_eq!(record.ports.len(), 2);
        assert_eq!(record.ports[0].public_port, Some(8080));
        assert_eq!(record.ports[1].public_port, None);
    }

    #[test]
    fn test_parse_ps_output_skips_blank_lines() {
        let records = parse_ps_output("abc|web|nginx|Up|\n\ndef|db|postgres|Up|5432/tcp\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].names, vec!["db".to_string()]);
    }

    #[test]
    fn test_parse_event_line_container() {
        let line = r#"{"status":"start","id":"abc123","Type":"container","Action":"start","Actor":{"ID":"abc123","Attributes":{"image":"nginx","name":"web"}},"time":1712000000}"#;
        let event = parse_event_line(line).unwrap();
        assert_eq!(event.action, "start");
        assert_eq!(event.name, "web");
        assert_eq!(event.id, "abc123");
    }

    #[test]
    fn test_parse_event_line_rejects_non_container() {
        let line = r#"{"Type":"network","Action":"connect","Actor":{"Attributes":{}}}"#;
        assert!(parse_event_line(line).is_none());
        assert!(parse_event_line("{\"Type\":\"conta").is_none());
    }
}
