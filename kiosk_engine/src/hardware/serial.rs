use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use super::{HardwareBus, HardwareError};

/// Device name prefixes that look like an Arduino or USB serial adapter.
const PORT_PREFIXES: &[&str] = &[
    "ttyACM",
    "ttyUSB",
    "cu.usbmodem",
    "cu.usbserial",
    "cu.wchusbserial",
    "tty.usbmodem",
    "tty.usbserial",
];

#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Explicit device; auto-detected under `dev_dir` when absent.
    pub port: Option<PathBuf>,
    pub baud: u32,
    /// Gap after each command of a sequence.
    pub gap: Duration,
    /// The board resets when the port opens; writes before then are lost.
    pub reset_wait: Duration,
    pub dev_dir: PathBuf,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 9600,
            gap: Duration::from_millis(50),
            reset_wait: Duration::from_millis(2500),
            dev_dir: PathBuf::from("/dev"),
        }
    }
}

enum Command {
    Sequence(Vec<String>, Duration),
    Close,
}

/// Serial link to the actuator controller. Writes happen on a dedicated
/// thread so a slow or absent device never stalls the caller.
pub struct SerialBus {
    sender: Mutex<Sender<Command>>,
}

impl SerialBus {
    pub fn open(config: SerialConfig) -> Result<Self, HardwareError> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("serial_bus".to_string())
            .spawn(move || worker_loop(config, rx))?;
        Ok(Self {
            sender: Mutex::new(tx),
        })
    }

    fn post(&self, command: Command) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if sender.send(command).is_err() {
            debug!("serial worker gone; command dropped");
        }
    }
}

impl HardwareBus for SerialBus {
    fn send_sequence(&self, commands: &[String], gap: Duration) {
        if commands.is_empty() {
            return;
        }
        self.post(Command::Sequence(commands.to_vec(), gap));
    }

    fn close(&self) {
        self.post(Command::Close);
    }
}

/// First device under `dev_dir` whose name looks like a USB serial adapter.
pub fn detect_port(dev_dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dev_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            PORT_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        })
        .map(|entry| entry.path())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn open_port(config: &SerialConfig) -> Option<(PathBuf, File)> {
    let port = match config.port.clone().or_else(|| detect_port(&config.dev_dir)) {
        Some(port) => port,
        None => {
            warn!("no serial port found; serial actions disabled");
            return None;
        }
    };
    configure_line(&port, config.baud);
    match OpenOptions::new().write(true).open(&port) {
        Ok(file) => {
            thread::sleep(config.reset_wait);
            info!("serial connected on {} @ {}", port.display(), config.baud);
            Some((port, file))
        }
        Err(err) => {
            warn!(
                "serial open failed for {}: {err}; continuing without serial",
                port.display()
            );
            None
        }
    }
}

// Raw mode at the configured baud. Best effort: a missing `stty` only
// means the device keeps its current settings.
fn configure_line(port: &Path, baud: u32) {
    let status = Process::new("stty")
        .arg("-F")
        .arg(port)
        .arg(baud.to_string())
        .args(["raw", "-echo"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => debug!("stty for {} exited with {status}", port.display()),
        Err(err) => debug!("stty unavailable: {err}"),
    }
}

fn worker_loop(config: SerialConfig, rx: Receiver<Command>) {
    let mut port = open_port(&config);
    while let Ok(command) = rx.recv() {
        match command {
            Command::Sequence(commands, gap) => {
                for command in commands {
                    info!("serial -> {command:?}");
                    if let Some((path, file)) = port.as_mut() {
                        let written = file
                            .write_all(command.as_bytes())
                            .and_then(|_| file.flush());
                        if let Err(err) = written {
                            warn!("serial send to {} failed: {err}", path.display());
                        }
                    }
                    thread::sleep(gap);
                }
            }
            Command::Close => {
                if let Some((path, _)) = port.take() {
                    debug!("serial port {} closed", path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_usb_serial_devices_in_name_order() {
        let dir = tempdir().unwrap();
        for name in ["tty0", "ttyUSB1", "ttyACM0", "null"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(detect_port(dir.path()), Some(dir.path().join("ttyACM0")));
    }

    #[test]
    fn no_candidates_means_no_port() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tty0"), b"").unwrap();
        assert_eq!(detect_port(dir.path()), None);
        assert_eq!(detect_port(&dir.path().join("missing")), None);
    }

    #[test]
    fn sequences_are_written_in_order() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("ttyACM0");
        fs::write(&device, b"").unwrap();
        let bus = SerialBus::open(SerialConfig {
            port: Some(device.clone()),
            reset_wait: Duration::ZERO,
            ..SerialConfig::default()
        })
        .unwrap();
        bus.send_sequence(&["f".into(), "x".into(), "c".into()], Duration::ZERO);
        bus.close();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fs::read(&device).unwrap() != b"fxc" {
            assert!(std::time::Instant::now() < deadline, "serial writes never landed");
            thread::sleep(Duration::from_millis(10));
        }
    }
}
