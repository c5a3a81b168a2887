//! Capability interfaces for the installation's physical side effects.
//!
//! Every call is fire-and-forget: implementations hand the work to their
//! own thread or task and return immediately. Failures are logged where
//! they happen and never reach the controller.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use thiserror::Error;

pub mod osc;
pub mod serial;
pub mod workers;

pub use osc::OscCues;
pub use serial::{SerialBus, SerialConfig};
pub use workers::{SshWorkers, WorkerTarget};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("hardware I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode {0}")]
    Encode(String),
}

/// Ordered single-character commands for the actuator controller.
pub trait HardwareBus: Send + Sync {
    fn send_sequence(&self, commands: &[String], gap: Duration);
    fn close(&self) {}
}

/// The fixed set of remote workers, started and stopped together.
pub trait RemoteWorkerControl: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// One-shot show-control cues (address plus an integer argument).
pub trait CueOutput: Send + Sync {
    fn send(&self, address: &str, value: i32);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl HardwareBus for NullBus {
    fn send_sequence(&self, commands: &[String], _gap: Duration) {
        debug!("serial disabled; dropping {commands:?}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullWorkers;

impl RemoteWorkerControl for NullWorkers {
    fn start(&self) {
        debug!("workers disabled; ignoring start");
    }

    fn stop(&self) {
        debug!("workers disabled; ignoring stop");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCues;

impl CueOutput for NullCues {
    fn send(&self, address: &str, value: i32) {
        debug!("cues disabled; dropping {address} {value}");
    }
}

/// Handles to every hardware collaborator, shared with the action guard.
#[derive(Clone)]
pub struct Hardware {
    pub bus: Arc<dyn HardwareBus>,
    pub workers: Arc<dyn RemoteWorkerControl>,
    pub cues: Arc<dyn CueOutput>,
}

impl Hardware {
    /// Hardware with every collaborator disabled.
    pub fn null() -> Self {
        Self {
            bus: Arc::new(NullBus),
            workers: Arc::new(NullWorkers),
            cues: Arc::new(NullCues),
        }
    }

    /// Best-effort teardown at process exit.
    pub fn shutdown(&self) {
        self.workers.stop();
        self.bus.close();
    }
}
