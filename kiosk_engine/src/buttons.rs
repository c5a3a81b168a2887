//! Button drivers. Each reads press lines from some source, debounces them
//! per role and posts them to the gate.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::gate::Gate;
use crate::graph::Role;
use crate::hardware::HardwareError;
use crate::input::Debouncer;

/// BCM line offsets of the three buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPins {
    pub left: u32,
    pub center: u32,
    pub right: u32,
}

impl Default for ButtonPins {
    fn default() -> Self {
        Self {
            left: 26,
            center: 16,
            right: 13,
        }
    }
}

impl ButtonPins {
    pub fn role_for(&self, offset: u32) -> Option<Role> {
        match offset {
            o if o == self.left => Some(Role::Left),
            o if o == self.center => Some(Role::Center),
            o if o == self.right => Some(Role::Right),
            _ => None,
        }
    }
}

/// A decoded input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Press(Role),
    Quit,
}

/// `gpiomon --format=%o` prints one line offset per event.
pub fn parse_gpio_line(line: &str, pins: &ButtonPins) -> Option<KeyCommand> {
    let offset = line.trim().parse::<u32>().ok()?;
    pins.role_for(offset).map(KeyCommand::Press)
}

/// Bench keyboard: `l`, `c`, `r` (or the full role names), `q` to quit.
pub fn parse_key_line(line: &str) -> Option<KeyCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "l" | "left" => Some(KeyCommand::Press(Role::Left)),
        "c" | "center" => Some(KeyCommand::Press(Role::Center)),
        "r" | "right" => Some(KeyCommand::Press(Role::Right)),
        "q" | "quit" => Some(KeyCommand::Quit),
        _ => None,
    }
}

/// Reads lines until EOF or until the gate closes.
pub async fn pump_lines<R, F>(reader: R, parse: F, debounce: Duration, gate: Gate)
where
    R: AsyncBufRead + Unpin,
    F: Fn(&str) -> Option<KeyCommand>,
{
    let mut debouncer = Debouncer::new(debounce);
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("button input read failed: {err}");
                break;
            }
        };
        let posted = match parse(&line) {
            Some(KeyCommand::Press(role)) => {
                if !debouncer.accept(role, Instant::now()) {
                    debug!("{role} bounce ignored");
                    continue;
                }
                debug!("{role} pressed");
                gate.press(role)
            }
            Some(KeyCommand::Quit) => gate.shutdown(),
            None => {
                debug!("unrecognised input line {line:?}");
                continue;
            }
        };
        if !posted {
            break;
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpioConfig {
    pub program: String,
    pub chip: String,
    pub pins: ButtonPins,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            program: "gpiomon".to_string(),
            chip: "gpiochip0".to_string(),
            pins: ButtonPins::default(),
        }
    }
}

/// Physical buttons watched through a `gpiomon` child process. The child
/// is killed when the driver is dropped.
pub struct GpioButtons {
    child: Child,
    task: JoinHandle<()>,
}

impl GpioButtons {
    pub fn spawn(config: GpioConfig, debounce: Duration, gate: Gate) -> Result<Self, HardwareError> {
        let pins = config.pins;
        let mut child = Command::new(&config.program)
            .args(["--falling-edge", "--bias=pull-up", "--format=%o"])
            .arg(&config.chip)
            .args([pins.left, pins.center, pins.right].map(|pin| pin.to_string()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HardwareError::Spawn {
                program: config.program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            HardwareError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "gpiomon stdout not piped",
            ))
        })?;
        info!(
            "buttons on {} L={} C={} R={}",
            config.chip, pins.left, pins.center, pins.right
        );
        let task = tokio::spawn(async move {
            pump_lines(
                BufReader::new(stdout),
                move |line| parse_gpio_line(line, &pins),
                debounce,
                gate,
            )
            .await;
            warn!("gpiomon output ended; buttons disabled");
        });
        Ok(Self { child, task })
    }

    pub async fn shutdown(mut self) {
        self.task.abort();
        if let Err(err) = self.child.kill().await {
            debug!("gpiomon already gone: {err}");
        }
    }
}

/// Bench input from the terminal.
pub struct StdinButtons {
    task: JoinHandle<()>,
}

impl StdinButtons {
    pub fn spawn(debounce: Duration, gate: Gate) -> Self {
        info!("keyboard input: l/c/r then Enter, q to quit");
        let task = tokio::spawn(async move {
            pump_lines(
                BufReader::new(tokio::io::stdin()),
                parse_key_line,
                debounce,
                gate,
            )
            .await;
        });
        Self { task }
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::KioskEvent;

    #[test]
    fn gpio_offsets_map_to_roles() {
        let pins = ButtonPins::default();
        assert_eq!(parse_gpio_line("26\n", &pins), Some(KeyCommand::Press(Role::Left)));
        assert_eq!(parse_gpio_line("16", &pins), Some(KeyCommand::Press(Role::Center)));
        assert_eq!(parse_gpio_line("13", &pins), Some(KeyCommand::Press(Role::Right)));
        assert_eq!(parse_gpio_line("4", &pins), None);
        assert_eq!(parse_gpio_line("event: FALLING", &pins), None);
    }

    #[test]
    fn keyboard_lines_accept_short_and_long_names() {
        assert_eq!(parse_key_line("L"), Some(KeyCommand::Press(Role::Left)));
        assert_eq!(parse_key_line(" center "), Some(KeyCommand::Press(Role::Center)));
        assert_eq!(parse_key_line("q"), Some(KeyCommand::Quit));
        assert_eq!(parse_key_line("x"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn bounces_within_the_window_are_dropped() {
        let (gate, mut rx) = Gate::channel();
        let input: &[u8] = b"26\n26\n16\nnoise\n";
        pump_lines(
            BufReader::new(input),
            |line| parse_gpio_line(line, &ButtonPins::default()),
            Duration::from_millis(100),
            gate,
        )
        .await;

        let mut roles = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let KioskEvent::Press { role, .. } = event {
                roles.push(role);
            }
        }
        assert_eq!(roles, vec![Role::Left, Role::Center]);
    }

    #[tokio::test]
    async fn quit_line_posts_shutdown() {
        let (gate, mut rx) = Gate::channel();
        let input: &[u8] = b"r\nq\n";
        pump_lines(BufReader::new(input), parse_key_line, Duration::ZERO, gate).await;
        assert!(matches!(rx.try_recv(), Ok(KioskEvent::Press { role: Role::Right, .. })));
        assert_eq!(rx.try_recv(), Ok(KioskEvent::Shutdown));
    }
}
