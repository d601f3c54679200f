//! Container inventory watcher
//!
//! Lists containers that publish ports and relays container lifecycle events
//! so interested parties can re-list. Event delivery may coalesce or
//! duplicate; consumers treat any firing as "re-list", not as a delta.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::container::{ContainerEvent, ContainerRecord};
use crate::infra::docker::{ContainerRuntime, DockerError};

/// 事件广播通道容量
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 事件流断开后的重订阅间隔
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(5);

/// 容器清单
pub struct ContainerInventory {
    runtime: Arc<dyn ContainerRuntime>,
    events_tx: broadcast::Sender<ContainerEvent>,
}

impl ContainerInventory {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { runtime, events_tx }
    }

    /// 只返回发布了公开端口的容器，保持底层列表顺序
    pub async fn list_exposable(&self) -> Result<Vec<ContainerRecord>, DockerError> {
        let containers = self.runtime.list_containers().await?;
        let exposable: Vec<ContainerRecord> = containers
            .into_iter()
            .filter(|c| c.is_exposable())
            .collect();
        debug!(
            containers = ?exposable.iter().map(|c| c.display_name()).collect::<Vec<_>>(),
            "Listed exposable containers"
        );
        Ok(exposable)
    }

    /// 订阅生命周期事件；任何一次触发都应当重新拉取列表
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events_tx.subscribe()
    }

    /// 长驻任务：把运行时事件流转发到广播通道，流断开后退避重连
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Container inventory watcher started");

        loop {
            let mut events = match self.runtime.container_events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to container events; retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = sleep(RESUBSCRIBE_BACKOFF) => continue,
                    }
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    event = events.recv() => {
                        match event {
                            Some(event) => {
                                debug!(
                                    action = %event.action,
                                    container = %event.name,
                                    "Container lifecycle event"
                                );
                                let _ = self.events_tx.send(event);
                            }
                            None => {
                                warn!("Container event stream closed; resubscribing");
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(RESUBSCRIBE_BACKOFF) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::domain::container::PublishedPort;
    use crate::infra::docker::{LogStreams, TunnelLaunchSpec};

    fn record(name: &str, public_port: Option<u16>) -> ContainerRecord {
        ContainerRecord {
            id: format!("id-{}", name),
            names: vec![name.to_string()],
            image: "nginx:latest".to_string(),
            status: "Up".to_string(),
            ports: vec![PublishedPort {
                public_port,
                protocol_type: "tcp".to_string(),
            }],
        }
    }

    struct FakeRuntime {
        containers: Vec<ContainerRecord>,
        events_tx_slot: Mutex<Option<mpsc::Sender<ContainerEvent>>>,
    }

    impl FakeRuntime {
        fn new(containers: Vec<ContainerRecord>) -> Self {
            Self {
                containers,
                events_tx_slot: Mutex::new(None),
            }
        }

        fn event_sender(&self) -> Option<mpsc::Sender<ContainerEvent>> {
            self.events_tx_slot.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn launch_tunnel(&self, _spec: &TunnelLaunchSpec) -> Result<(), DockerError> {
            Ok(())
        }

        async fn fetch_logs(&self, _name: &str) -> Result<LogStreams, DockerError> {
            Ok(LogStreams::default())
        }

        async fn remove_container(&self, _name: &str) -> Result<(), DockerError> {
            Ok(())
        }

        async fn list_containers(&self) -> Result<Vec<ContainerRecord>, DockerError> {
            Ok(self.containers.clone())
        }

        async fn container_events(&self) -> Result<mpsc::Receiver<ContainerEvent>, DockerError> {
            let (tx, rx) = mpsc::channel(8);
            *self.events_tx_slot.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn test_list_exposable_filters_and_preserves_order() {
        let runtime = Arc::new(FakeRuntime::new(vec![
            record("alpha", Some(8080)),
            record("beta", None),
            record("gamma", Some(9090)),
        ]));
        let inventory = ContainerInventory::new(runtime);

        let listed = inventory.list_exposable().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
    }

    #[tokio::test]
    async fn test_run_forwards_events_until_shutdown() {
        let runtime = Arc::new(FakeRuntime::new(vec![]));
        let inventory = Arc::new(ContainerInventory::new(runtime.clone()));
        let mut subscriber = inventory.subscribe();

        let shutdown = CancellationToken::new();
        let watcher = tokio::spawn(inventory.clone().run(shutdown.clone()));

        // 等 watcher 建立事件流
        let sender = loop {
            if let Some(sender) = runtime.event_sender() {
                break sender;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        sender
            .send(ContainerEvent {
                action: "start".to_string(),
                name: "web".to_string(),
                id: "abc123".to_string(),
            })
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap();
        assert_eq!(event.action, "start");
        assert_eq!(event.name, "web");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher did not stop on shutdown")
            .unwrap();
    }
}
