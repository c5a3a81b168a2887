use std::process::Stdio;

use log::{debug, info, warn};
use tokio::process::{Child, Command};

use crate::hardware::HardwareError;

/// Companion process (normally the kiosk browser that renders the HUD),
/// started at boot and killed at shutdown or when dropped.
pub struct HudLauncher {
    program: String,
    child: Child,
}

impl HudLauncher {
    /// `command` is the program followed by its arguments.
    pub fn launch(command: &[String]) -> Result<Self, HardwareError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            HardwareError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty HUD command",
            ))
        })?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HardwareError::Spawn {
                program: program.clone(),
                source,
            })?;
        info!("HUD launcher {program} started (pid {:?})", child.id());
        Ok(Self {
            program: program.clone(),
            child,
        })
    }

    /// Returns the exit status text once the process has exited.
    pub fn exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(err) => Some(err.to_string()),
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(status) = self.exited() {
            debug!("HUD launcher {} already exited: {status}", self.program);
            return;
        }
        match self.child.kill().await {
            Ok(()) => info!("HUD launcher {} stopped", self.program),
            Err(err) => warn!("failed to stop HUD launcher {}: {err}", self.program),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(HudLauncher::launch(&[]), Err(HardwareError::Io(_))));
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_error() {
        let result = HudLauncher::launch(&["/nonexistent/hud-browser".to_string()]);
        assert!(matches!(result, Err(HardwareError::Spawn { .. })));
    }

    #[tokio::test]
    async fn launched_process_is_stopped() {
        let mut launcher =
            HudLauncher::launch(&["sleep".to_string(), "30".to_string()]).unwrap();
        assert_eq!(launcher.exited(), None);
        launcher.shutdown().await;
    }
}
