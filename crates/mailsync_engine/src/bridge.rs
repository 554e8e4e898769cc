//! Wires host trigger sources to the engine.

use crate::engine::SyncEngine;
use crate::env::Environment;
use crate::state::ContainerSelector;
use mailsync_protocol::RealtimeEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What the host platform can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// A background execution context outlives the UI.
    pub background_execution: bool,
    /// The host delivers periodic background-sync callbacks.
    pub periodic_background_sync: bool,
}

impl HostCapabilities {
    /// Picks the environment adapter to build for this host.
    pub fn adapter(&self) -> HostAdapter {
        if self.background_execution {
            HostAdapter::Background
        } else {
            HostAdapter::Foreground
        }
    }

    /// Whether the bridge runs its own heartbeat.
    ///
    /// Background hosts that deliver periodic sync callbacks wake the engine
    /// through [`Trigger::BackgroundSync`] instead.
    pub fn needs_heartbeat(&self) -> bool {
        !(self.background_execution && self.periodic_background_sync)
    }
}

/// Which environment adapter the host runs the engine under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostAdapter {
    /// [`crate::BackgroundAdapter`].
    Background,
    /// [`crate::ForegroundAdapter`], driven by the heartbeat.
    Foreground,
}

/// Bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interval of the foreground heartbeat.
    pub heartbeat: Duration,
}

impl BridgeConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
        }
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that start engine work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Connectivity came back.
    NetworkOnline,
    /// The UI was shown or hidden.
    VisibilityChanged {
        /// Whether the UI is now visible.
        visible: bool,
    },
    /// Heartbeat tick.
    Periodic,
    /// Host-native background-sync callback.
    BackgroundSync,
    /// Realtime change notification.
    Realtime(RealtimeEvent),
    /// Explicit refresh; overrides failure backoff.
    UserRefresh(ContainerSelector),
}

#[derive(Debug)]
enum BridgeCommand {
    Trigger(Trigger),
    Stop,
}

/// Sends triggers to a running [`SyncBridge`].
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    /// Delivers a trigger. Returns false once the bridge has stopped.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        self.commands.send(BridgeCommand::Trigger(trigger)).is_ok()
    }

    /// Stops the bridge after its running work finishes.
    pub fn stop(&self) {
        let _ = self.commands.send(BridgeCommand::Stop);
    }
}

/// Event loop turning triggers into engine calls.
pub struct SyncBridge<E> {
    engine: SyncEngine<E>,
    adapter: HostAdapter,
    heartbeat: bool,
    config: BridgeConfig,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    visible: bool,
    tasks: JoinSet<()>,
}

impl<E: Environment + 'static> SyncBridge<E> {
    /// Creates a bridge for a host and the handle that drives it.
    pub fn new(
        engine: SyncEngine<E>,
        capabilities: &HostCapabilities,
        config: BridgeConfig,
    ) -> (Self, BridgeHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            engine,
            adapter: capabilities.adapter(),
            heartbeat: capabilities.needs_heartbeat(),
            config,
            commands: rx,
            visible: true,
            tasks: JoinSet::new(),
        };
        (bridge, BridgeHandle { commands: tx })
    }

    /// Returns the adapter this bridge was set up for.
    pub fn adapter(&self) -> HostAdapter {
        self.adapter
    }

    /// Runs the loop on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs the loop until stopped or every handle is dropped.
    pub async fn run(mut self) {
        info!(adapter = ?self.adapter, heartbeat = self.heartbeat, "sync bridge started");

        let period = self.config.heartbeat.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            let beating = self.heartbeat_active();
            tokio::select! {
                _ = heartbeat.tick(), if beating => {
                    self.dispatch(Trigger::Periodic);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(BridgeCommand::Trigger(trigger)) => self.dispatch(trigger),
                        Some(BridgeCommand::Stop) | None => break,
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "bridge task failed");
                    }
                }
            }
        }

        info!("sync bridge stopping");
        while self.tasks.join_next().await.is_some() {}
    }

    /// The foreground heartbeat pauses while the UI is hidden.
    fn heartbeat_active(&self) -> bool {
        self.heartbeat && (self.adapter == HostAdapter::Background || self.visible)
    }

    fn dispatch(&mut self, trigger: Trigger) {
        debug!(?trigger, "trigger received");
        match trigger {
            Trigger::NetworkOnline | Trigger::BackgroundSync => {
                self.spawn_cycle(ContainerSelector::All);
            }
            Trigger::VisibilityChanged { visible } => {
                self.visible = visible;
                if visible {
                    self.spawn_cycle(ContainerSelector::All);
                }
            }
            Trigger::Periodic => {
                let engine = self.engine.clone();
                self.tasks.spawn(async move {
                    engine.drain_mutations(ContainerSelector::All).await;
                });
            }
            Trigger::Realtime(event) => {
                let engine = self.engine.clone();
                self.tasks.spawn(async move {
                    if let Err(err) = engine.notify_remote_change(&event).await {
                        warn!(error = %err, container = %event.container, "ignoring realtime event");
                    }
                });
            }
            Trigger::UserRefresh(selector) => {
                self.engine.clear_backoff(&selector);
                self.spawn_cycle(selector);
            }
        }
    }

    fn spawn_cycle(&mut self, selector: ContainerSelector) {
        let engine = self.engine.clone();
        self.tasks.spawn(async move {
            engine.start_sync(selector).await;
        });
    }
}

impl<E> std::fmt::Debug for SyncBridge<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBridge")
            .field("adapter", &self.adapter)
            .field("heartbeat", &self.heartbeat)
            .field("config", &self.config)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_pick_adapter() {
        let worker = HostCapabilities {
            background_execution: true,
            periodic_background_sync: true,
        };
        assert_eq!(worker.adapter(), HostAdapter::Background);
        assert!(!worker.needs_heartbeat());
        assert_eq!(HostCapabilities::default().adapter(), HostAdapter::Foreground);
        assert!(HostCapabilities::default().needs_heartbeat());

        let bare_worker = HostCapabilities {
            background_execution: true,
            periodic_background_sync: false,
        };
        assert_eq!(bare_worker.adapter(), HostAdapter::Background);
        assert!(bare_worker.needs_heartbeat());
    }

    #[test]
    fn bridge_config_builder() {
        let config = BridgeConfig::new().with_heartbeat(Duration::from_secs(15));
        assert_eq!(config.heartbeat, Duration::from_secs(15));
        assert_eq!(BridgeConfig::default().heartbeat, Duration::from_secs(60));
    }
}
