//! Runs a [`Hub`] from file configuration and logs its lifecycle events.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, watch};

use nodewire_transport::{Hub, HubConfig, HubEvent};

use crate::config::HubFileConfig;
use crate::error::HubError;

/// Cloneable trigger for [`Supervisor::run`] to return.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Supervisor {
    config: HubConfig,
    hub: Option<Hub>,
    events: Option<mpsc::Receiver<HubEvent>>,
    connected: BTreeSet<u32>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(config: HubConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            hub: None,
            events: None,
            connected: BTreeSet::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn from_file_config(config: &HubFileConfig) -> Result<Self, HubError> {
        Ok(Self::new(config.to_hub_config()?))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn hub(&self) -> Option<&Hub> {
        self.hub.as_ref()
    }

    /// Ids of primary nodes currently connected, as seen through events.
    pub fn connected(&self) -> impl Iterator<Item = u32> + '_ {
        self.connected.iter().copied()
    }

    /// Bind the listener.
    pub async fn start(&mut self) -> Result<(), HubError> {
        if self.hub.is_some() {
            return Err(HubError::AlreadyRunning);
        }
        let hub = Hub::start(self.config.clone()).await?;
        tracing::info!(local_addr = %hub.local_addr(), "hub started");
        self.events = hub.take_events();
        self.hub = Some(hub);
        Ok(())
    }

    /// Process hub events until shutdown is signalled.
    pub async fn run(&mut self) -> Result<(), HubError> {
        let mut events = self.events.take().ok_or(HubError::NotStarted)?;
        tracing::info!("entering event loop");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    tracing::info!("shutdown signal received");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::info!("event channel closed, exiting");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::NodeConnected { id, peer } => {
                self.connected.insert(id);
                tracing::info!(
                    node_id = id,
                    ?peer,
                    connected = self.connected.len(),
                    "agent online"
                );
            }
            HubEvent::NodeDisconnected { id } => {
                self.connected.remove(&id);
                tracing::info!(node_id = id, connected = self.connected.len(), "agent offline");
            }
            HubEvent::AuthenticationFailed { peer, reason } => {
                tracing::warn!(?peer, %reason, "rejected connection");
            }
        }
    }

    /// Stop the hub and disconnect every agent.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down hub");
        let _ = self.shutdown_tx.send(true);
        if let Some(hub) = self.hub.take() {
            hub.stop().await;
        }
        tracing::info!("hub shutdown complete");
    }
}
