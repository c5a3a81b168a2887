use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use crate::buttons::{ButtonPins, GpioConfig};
use crate::graph::AssetRoots;
use crate::hardware::{SerialConfig, WorkerTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ButtonSource {
    /// Physical buttons through `gpiomon`
    Gpio,
    /// `l`/`c`/`r` lines on stdin
    Stdin,
    None,
}

#[derive(Parser, Debug)]
#[command(about = "Interactive video kiosk with hardware effects", version)]
pub struct Args {
    /// State graph JSON
    #[arg(long, value_hint = clap::ValueHint::FilePath, default_value = "kiosk_engine/assets/states.json")]
    pub states: PathBuf,

    /// Hardware action table JSON
    #[arg(long, value_hint = clap::ValueHint::FilePath, default_value = "kiosk_engine/assets/actions.json")]
    pub actions: PathBuf,

    /// Directory holding the videos (default: lola/ beside the state graph)
    #[arg(long)]
    pub media_root: Option<PathBuf>,

    /// Directory holding the HUD sprites (default: jellies/ beside the state graph)
    #[arg(long)]
    pub sprite_root: Option<PathBuf>,

    /// Seconds without a press before a waiting choice returns to the intro loop
    #[arg(long, default_value_t = 90)]
    pub inactivity_secs: u64,

    #[arg(long, value_enum, default_value_t = ButtonSource::Gpio)]
    pub buttons: ButtonSource,

    #[arg(long, default_value = "gpiochip0")]
    pub gpio_chip: String,

    #[arg(long, default_value_t = 26)]
    pub gpio_left: u32,

    #[arg(long, default_value_t = 16)]
    pub gpio_center: u32,

    #[arg(long, default_value_t = 13)]
    pub gpio_right: u32,

    /// Per-button debounce window in milliseconds
    #[arg(long, default_value_t = 100)]
    pub debounce_ms: u64,

    /// Path to the mpv executable
    #[arg(long, default_value = "mpv")]
    pub mpv: PathBuf,

    /// IPC socket used to drive mpv
    #[arg(long, default_value = "/tmp/kiosk-mpv.sock")]
    pub mpv_socket: PathBuf,

    /// Monitor that shows the videos
    #[arg(long, default_value = "HDMI-A-2")]
    pub video_display: String,

    /// Address the HUD server listens on (host:port)
    #[arg(long, default_value = "127.0.0.1:17500")]
    pub hud_bind: String,

    /// Command line (split on whitespace) of the program that renders the
    /// HUD, started at boot
    #[arg(long)]
    pub hud_command: Option<String>,

    /// Run without serial, remote workers or cues
    #[arg(long)]
    pub no_hardware: bool,

    /// Serial device of the actuator controller (auto-detected when unset)
    #[arg(long, env = "ARDUINO_PORT")]
    pub serial_port: Option<PathBuf>,

    #[arg(long, env = "ARDUINO_BAUD", default_value_t = 9600)]
    pub serial_baud: u32,

    /// Seconds between serial commands of one sequence (overrides the
    /// action table's gap)
    #[arg(long, env = "ARDUINO_INTER")]
    pub serial_inter: Option<f64>,

    #[arg(long, env = "MINER1_IP", default_value = "10.162.142.177")]
    pub miner1_ip: String,

    #[arg(long, env = "MINER1_USER", default_value = "root")]
    pub miner1_user: String,

    #[arg(long, env = "MINER2_IP", default_value = "10.162.142.113")]
    pub miner2_ip: String,

    #[arg(long, env = "MINER2_USER", default_value = "root")]
    pub miner2_user: String,

    #[arg(long, env = "KARAOKE_OSC_IP", default_value = "127.0.0.1")]
    pub osc_ip: String,

    #[arg(long, env = "KARAOKE_OSC_PORT", default_value_t = 8000)]
    pub osc_port: u16,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.inactivity_secs == 0 {
            bail!("--inactivity-secs must be positive");
        }
        if let Some(inter) = self.serial_inter {
            if !inter.is_finite() || inter < 0.0 {
                bail!("ARDUINO_INTER must be a non-negative number of seconds, got {inter}");
            }
        }
        let pins = [self.gpio_left, self.gpio_center, self.gpio_right];
        if pins[0] == pins[1] || pins[1] == pins[2] || pins[0] == pins[2] {
            bail!("button GPIO lines must be distinct, got {pins:?}");
        }
        Ok(())
    }

    pub fn asset_roots(&self) -> AssetRoots {
        let defaults = AssetRoots::beside(&self.states);
        AssetRoots {
            media_root: self.media_root.clone().unwrap_or(defaults.media_root),
            sprite_root: self.sprite_root.clone().unwrap_or(defaults.sprite_root),
        }
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn gpio(&self) -> GpioConfig {
        GpioConfig {
            chip: self.gpio_chip.clone(),
            pins: ButtonPins {
                left: self.gpio_left,
                center: self.gpio_center,
                right: self.gpio_right,
            },
            ..GpioConfig::default()
        }
    }

    pub fn serial_gap(&self) -> Option<Duration> {
        self.serial_inter.map(Duration::from_secs_f64)
    }

    pub fn serial(&self) -> SerialConfig {
        let defaults = SerialConfig::default();
        SerialConfig {
            port: self.serial_port.clone(),
            baud: self.serial_baud,
            gap: self.serial_gap().unwrap_or(defaults.gap),
            ..defaults
        }
    }

    pub fn workers(&self) -> Vec<WorkerTarget> {
        vec![
            WorkerTarget::new("miner1", &self.miner1_ip, &self.miner1_user),
            WorkerTarget::new("miner2", &self.miner2_ip, &self.miner2_user),
        ]
    }

    pub fn hud_argv(&self) -> Vec<String> {
        self.hud_command
            .as_deref()
            .map(|command| command.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn osc_target(&self) -> String {
        format!("{}:{}", self.osc_ip, self.osc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_installation() {
        let args = Args::try_parse_from(["kiosk"]).unwrap();
        assert!(args.validate().is_ok());
        assert_eq!(args.inactivity(), Duration::from_secs(90));
        assert_eq!(args.gpio().pins, ButtonPins::default());
        assert_eq!(args.buttons, ButtonSource::Gpio);
        assert_eq!(
            args.asset_roots().media_root,
            PathBuf::from("kiosk_engine/assets/lola")
        );
    }

    #[test]
    fn duplicate_pins_are_rejected() {
        let args =
            Args::try_parse_from(["kiosk", "--gpio-left", "16", "--buttons", "stdin"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn hud_command_is_split_into_argv() {
        let args = Args::try_parse_from([
            "kiosk",
            "--hud-command",
            "chromium --kiosk  file:///srv/hud.html",
            "--no-hardware",
        ])
        .unwrap();
        assert_eq!(args.hud_argv(), vec!["chromium", "--kiosk", "file:///srv/hud.html"]);
        assert!(args.no_hardware);
        assert!(Args::try_parse_from(["kiosk"]).unwrap().hud_argv().is_empty());
    }
}
