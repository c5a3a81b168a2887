use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{HardwareError, RemoteWorkerControl};

const SERVICE: &str = "/etc/init.d/bosminer";

/// A remote machine reachable over `ssh` with key authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTarget {
    pub name: String,
    pub host: String,
    pub user: String,
}

impl WorkerTarget {
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

/// Starts and stops the mining service on every target, in order.
///
/// The first command to a host opens a persistent control connection, so
/// later commands skip the handshake.
pub struct SshWorkers {
    inner: Arc<Inner>,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    program: PathBuf,
    targets: Vec<WorkerTarget>,
    connect_timeout: Duration,
    control_dir: PathBuf,
}

impl SshWorkers {
    pub fn new(targets: Vec<WorkerTarget>) -> Self {
        Self::with_program(PathBuf::from("ssh"), targets)
    }

    pub fn with_program(program: PathBuf, targets: Vec<WorkerTarget>) -> Self {
        Self {
            inner: Arc::new(Inner {
                program,
                targets,
                connect_timeout: Duration::from_secs(8),
                control_dir: std::env::temp_dir(),
            }),
            inflight: Mutex::new(Vec::new()),
        }
    }

    pub fn targets(&self) -> &[WorkerTarget] {
        &self.inner.targets
    }

    fn dispatch(&self, action: ServiceAction) {
        let inner = Arc::clone(&self.inner);
        match Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(async move { inner.run_all(action).await });
                let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
                inflight.retain(|task| !task.is_finished());
                inflight.push(task);
            }
            Err(_) => warn!("no async runtime; worker {} skipped", action.as_str()),
        }
    }

    /// Waits up to `limit` for dispatched commands to finish, so a stop
    /// issued at shutdown is not cut off when the runtime exits.
    pub async fn settle(&self, limit: Duration) {
        let tasks: Vec<JoinHandle<()>> = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let wait = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            debug!("worker commands still running after {limit:?}");
        }
    }
}

impl RemoteWorkerControl for SshWorkers {
    fn start(&self) {
        self.dispatch(ServiceAction::Start);
    }

    fn stop(&self) {
        self.dispatch(ServiceAction::Stop);
    }
}

impl Inner {
    async fn run_all(&self, action: ServiceAction) {
        for target in &self.targets {
            match self.run_one(target, action).await {
                Ok(()) => info!("worker {}: {SERVICE} {}", target.name, action.as_str()),
                Err(err) => warn!("worker {} ({}) command failed: {err}", target.name, target.host),
            }
        }
    }

    async fn run_one(&self, target: &WorkerTarget, action: ServiceAction) -> Result<(), HardwareError> {
        let program = self.program.to_string_lossy().into_owned();
        let status = Command::new(&self.program)
            .args(self.ssh_args(target, action))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| HardwareError::Spawn { program, source })?;
        if status.success() {
            Ok(())
        } else {
            Err(HardwareError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("ssh exited with {status}"),
            )))
        }
    }

    fn ssh_args(&self, target: &WorkerTarget, action: ServiceAction) -> Vec<String> {
        let control_path = self.control_dir.join("kiosk-ssh-%r@%h:%p");
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            "ControlPersist=10m".to_string(),
            format!("{}@{}", target.user, target.host),
            format!("{SERVICE} {}", action.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_invocation_targets_service_script() {
        let workers = SshWorkers::new(vec![WorkerTarget::new("miner1", "10.0.0.7", "root")]);
        let args = workers
            .inner
            .ssh_args(&workers.targets()[0], ServiceAction::Stop);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=8".to_string()));
        assert_eq!(args[args.len() - 2], "root@10.0.0.7");
        assert_eq!(args[args.len() - 1], "/etc/init.d/bosminer stop");
    }

    #[tokio::test]
    async fn missing_ssh_binary_is_reported_not_fatal() {
        let workers = SshWorkers::with_program(
            PathBuf::from("/nonexistent/ssh"),
            vec![WorkerTarget::new("miner1", "10.0.0.7", "root")],
        );
        let result = workers
            .inner
            .run_one(&workers.targets()[0], ServiceAction::Start)
            .await;
        assert!(matches!(result, Err(HardwareError::Spawn { .. })));
        // the fire-and-forget path only logs
        workers.start();
        workers.settle(Duration::from_secs(5)).await;
        assert!(workers.inflight.lock().unwrap().is_empty());
    }
}
