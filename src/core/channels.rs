//! Inter-task channel bundle
//!
//! Signal intake, credential onboarding and monitor commands are bounded
//! mpsc queues; shutdown is a broadcast every task subscribes to.

use tokio::sync::{broadcast, mpsc};

use crate::domain::{CredentialId, Signal};
use crate::monitor::MonitorCommand;

/// Default channel capacity for bounded channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Bundle of all inter-task communication channels
#[derive(Debug)]
pub struct ChannelBundle {
    /// Intake -> signal pipeline
    pub signal_tx: mpsc::Sender<Signal>,
    pub signal_rx: mpsc::Receiver<Signal>,

    /// Onboarding -> key validator: freshly inserted credentials
    pub credential_tx: mpsc::Sender<CredentialId>,
    pub credential_rx: mpsc::Receiver<CredentialId>,

    /// Engine / execution -> position monitor
    pub monitor_tx: mpsc::Sender<MonitorCommand>,
    pub monitor_rx: mpsc::Receiver<MonitorCommand>,

    /// Shutdown broadcast: engine -> all tasks
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ChannelBundle {
    pub fn new(capacity: usize) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(capacity);
        let (credential_tx, credential_rx) = mpsc::channel(capacity);
        let (monitor_tx, monitor_rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            signal_tx,
            signal_rx,
            credential_tx,
            credential_rx,
            monitor_tx,
            monitor_rx,
            shutdown_tx,
        }
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

impl Default for ChannelBundle {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
