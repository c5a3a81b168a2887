use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kiosk_hud::{HudMessage, MessageHeader, MessageKind, HEADER_LEN};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};

#[derive(Parser, Debug)]
#[command(about = "Kiosk HUD stream probe", version)]
struct Args {
    /// Address the kiosk HUD server listens on (host:port).
    #[arg(long, default_value = "127.0.0.1:17500")]
    addr: String,

    /// Stop after this many messages; 0 runs until the server closes.
    #[arg(long, default_value_t = 0)]
    count: usize,

    /// Also print heartbeats.
    #[arg(long)]
    heartbeats: bool,

    /// One JSON object per line instead of debug output.
    #[arg(long)]
    json: bool,

    /// Seconds to keep retrying the initial connection.
    #[arg(long, default_value_t = 10)]
    connect_secs: u64,

    /// Path to a file that should be created once the handshake arrives.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    ready_notify: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum ProbeError {
    #[error("no HUD server accepted a connection at {0}")]
    Unreachable(String),
    #[error("stream opened with {0:?} instead of a handshake")]
    NoHandshake(MessageKind),
}

struct ReadyNotifier {
    path: Option<PathBuf>,
    triggered: bool,
}

impl ReadyNotifier {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            triggered: false,
        }
    }

    fn mark_ready(&mut self, producer: &str) {
        if self.triggered {
            return;
        }
        let Some(path) = self.path.as_ref() else {
            return;
        };
        match fs::write(path, format!("{producer}\n")) {
            Ok(()) => {
                eprintln!("[hud_probe] signalled readiness at {}", path.display());
                self.triggered = true;
            }
            Err(err) => eprintln!(
                "[hud_probe] failed to write readiness marker {}: {err:?}",
                path.display()
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let socket = connect(&args.addr, Duration::from_secs(args.connect_secs)).await?;
    eprintln!("[hud_probe] connected to {}", args.addr);
    let mut reader = BufReader::new(socket);
    let mut ready = ReadyNotifier::new(args.ready_notify.clone());

    let mut seen = 0usize;
    while let Some(message) = read_message(&mut reader).await? {
        if seen == 0 {
            match &message {
                HudMessage::Hello(hello) => ready.mark_ready(&hello.producer),
                other => return Err(ProbeError::NoHandshake(other.kind()).into()),
            }
        }
        seen += 1;
        if matches!(message, HudMessage::Heartbeat(_)) && !args.heartbeats {
            continue;
        }
        println!("{}", render(&message, args.json)?);
        if args.count > 0 && seen >= args.count {
            break;
        }
    }
    eprintln!("[hud_probe] stream ended after {seen} messages");
    Ok(())
}

async fn connect(addr: &str, patience: Duration) -> Result<TcpStream> {
    let deadline = Instant::now() + patience;
    loop {
        match TcpStream::connect(addr).await {
            Ok(socket) => {
                socket.set_nodelay(true)?;
                return Ok(socket);
            }
            Err(err) if Instant::now() < deadline => {
                eprintln!("[hud_probe] waiting for {addr}: {err}");
                sleep(Duration::from_millis(250)).await;
            }
            Err(_) => return Err(ProbeError::Unreachable(addr.to_string()).into()),
        }
    }
}

/// Reads one framed message; `None` on a clean end of stream.
async fn read_message<R>(reader: &mut R) -> Result<Option<HudMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let header = MessageHeader::decode(&header)?;
    let mut payload = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .with_context(|| format!("reading {:?} payload of {} bytes", header.kind, header.length))?;
    Ok(Some(HudMessage::decode(&header, &payload)?))
}

#[derive(Serialize)]
struct JsonLine<'a, T: Serialize> {
    kind: &'static str,
    payload: &'a T,
}

fn json_line<T: Serialize>(kind: &'static str, payload: &T) -> Result<String> {
    Ok(serde_json::to_string(&JsonLine { kind, payload })?)
}

fn render(message: &HudMessage, json: bool) -> Result<String> {
    if !json {
        return Ok(format!("{message:?}"));
    }
    match message {
        HudMessage::Hello(payload) => json_line("hello", payload),
        HudMessage::Navigate(payload) => json_line("navigate", payload),
        HudMessage::Labels(payload) => json_line("labels", payload),
        HudMessage::Meters(payload) => json_line("meters", payload),
        HudMessage::Heartbeat(payload) => json_line("heartbeat", payload),
    }
}
