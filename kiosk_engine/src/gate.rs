//! Cross-thread message gate and the runner loop that owns the controller.
//!
//! Button drivers, the media backend's reader thread and the signal
//! handler only ever post [`KioskEvent`]s; the runner applies them one at a
//! time, so controller state is never touched concurrently.

use log::{debug, info};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};

use crate::controller::Controller;
use crate::graph::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskEvent {
    Press { role: Role, posted_at: Instant },
    MediaEnded { epoch: u64 },
    Shutdown,
}

/// Cloneable, thread-safe sender side of the gate. Posting never blocks.
#[derive(Debug, Clone)]
pub struct Gate {
    tx: UnboundedSender<KioskEvent>,
}

pub type GateReceiver = UnboundedReceiver<KioskEvent>;

impl Gate {
    pub fn channel() -> (Self, GateReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the runner has gone away.
    pub fn post(&self, event: KioskEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(err) => {
                debug!("gate closed; dropping {:?}", err.0);
                false
            }
        }
    }

    pub fn press(&self, role: Role) -> bool {
        self.post(KioskEvent::Press {
            role,
            posted_at: Instant::now(),
        })
    }

    pub fn media_ended(&self, epoch: u64) -> bool {
        self.post(KioskEvent::MediaEnded { epoch })
    }

    pub fn shutdown(&self) -> bool {
        self.post(KioskEvent::Shutdown)
    }
}

/// Why the runner stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    /// Every gate handle was dropped.
    Closed,
}

/// Applies gate events and inactivity expiry to `controller` until a
/// shutdown is posted.
pub async fn run(controller: &mut Controller, rx: &mut GateReceiver) -> RunExit {
    loop {
        let deadline = controller.inactivity_deadline();
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(KioskEvent::Shutdown) => {
                    info!("shutdown requested");
                    return RunExit::Shutdown;
                }
                Some(event) => controller.handle(event).await,
                None => return RunExit::Closed,
            },
            _ = wait_for(deadline) => controller.on_inactivity_expired(),
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
