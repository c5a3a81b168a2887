use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use kiosk_hud::{Heartbeat, Hello, HudMessage, Labels as LabelsMessage, Meters, Navigate};
use log::{debug, info, warn};

use crate::graph::Labels;

/// On-screen HUD: sprite page, three button labels and two meters.
pub trait OverlayDisplay: Send + Sync {
    fn navigate(&self, sprite: &str, labels: &Labels);
    fn set_labels(&self, labels: &Labels);
    fn set_meters(&self, temp_pct: u8, money_pct: u8);
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullOverlay;

impl OverlayDisplay for NullOverlay {
    fn navigate(&self, sprite: &str, _labels: &Labels) {
        debug!("overlay disabled; navigate {sprite} dropped");
    }

    fn set_labels(&self, _labels: &Labels) {}

    fn set_meters(&self, _temp_pct: u8, _money_pct: u8) {}

    fn is_ready(&self) -> bool {
        false
    }
}

enum Command {
    Send(HudMessage),
    Shutdown,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Serves HUD messages to a single connected client.
///
/// The latest page, labels and meters are kept so a client that connects
/// (or reconnects) late still shows the current screen.
pub struct HudServer {
    sender: Mutex<Sender<Command>>,
    connected: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl HudServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, build: Option<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).context("binding HUD socket")?;
        listener
            .set_nonblocking(true)
            .context("setting HUD listener non-blocking")?;
        let local_addr = listener.local_addr().context("reading HUD socket address")?;
        let (tx, rx) = mpsc::channel();
        let connected = Arc::new(AtomicBool::new(false));
        let build_info = build.unwrap_or_else(|| "dev".to_string());
        {
            let connected = Arc::clone(&connected);
            thread::Builder::new()
                .name("kiosk_hud".to_string())
                .spawn(move || worker_loop(listener, rx, build_info, connected))
                .context("spawning HUD worker thread")?;
        }
        info!("HUD server listening on {local_addr}");
        Ok(Self {
            sender: Mutex::new(tx),
            connected,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn post(&self, message: HudMessage) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(Command::Send(message)).is_err() {
            warn!("HUD worker disconnected; update dropped");
        }
    }
}

impl OverlayDisplay for HudServer {
    fn navigate(&self, sprite: &str, labels: &Labels) {
        self.post(HudMessage::Navigate(Navigate {
            sprite: sprite.to_string(),
            labels: labels.clone(),
        }));
    }

    fn set_labels(&self, labels: &Labels) {
        self.post(HudMessage::Labels(LabelsMessage {
            labels: labels.clone(),
        }));
    }

    fn set_meters(&self, temp_pct: u8, money_pct: u8) {
        self.post(HudMessage::Meters(Meters {
            temp_pct,
            money_pct,
        }));
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for HudServer {
    fn drop(&mut self) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sender.send(Command::Shutdown);
    }
}

/// Latest screen state, replayed to new clients.
#[derive(Debug, Default)]
struct Snapshot {
    navigate: Option<Navigate>,
    labels: Option<LabelsMessage>,
    meters: Option<Meters>,
}

impl Snapshot {
    fn record(&mut self, message: &HudMessage) {
        match message {
            HudMessage::Navigate(navigate) => {
                self.navigate = Some(navigate.clone());
                self.labels = None;
            }
            HudMessage::Labels(labels) => self.labels = Some(labels.clone()),
            HudMessage::Meters(meters) => self.meters = Some(*meters),
            HudMessage::Hello(_) | HudMessage::Heartbeat(_) => {}
        }
    }

    fn replay(&self) -> Vec<HudMessage> {
        let mut out = Vec::new();
        if let Some(navigate) = &self.navigate {
            out.push(HudMessage::Navigate(navigate.clone()));
        }
        if let Some(labels) = &self.labels {
            out.push(HudMessage::Labels(labels.clone()));
        }
        if let Some(meters) = self.meters {
            out.push(HudMessage::Meters(meters));
        }
        out
    }
}

fn worker_loop(
    listener: TcpListener,
    rx: Receiver<Command>,
    build_info: String,
    connected: Arc<AtomicBool>,
) {
    let mut stream: Option<TcpStream> = None;
    let mut snapshot = Snapshot::default();
    let started = Instant::now();
    let mut last_beat = Instant::now();
    let mut seq = 0u64;
    loop {
        match rx.recv_timeout(Duration::from_millis(16)) {
            Ok(Command::Send(message)) => {
                snapshot.record(&message);
                if let Some(conn) = stream.as_mut() {
                    if let Err(err) = send(conn, &message) {
                        warn!("HUD send failed: {err}; waiting for reconnect");
                        stream = None;
                    }
                }
            }
            Ok(Command::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(conn) = stream.as_mut() {
            if last_beat.elapsed() >= HEARTBEAT_INTERVAL {
                last_beat = Instant::now();
                seq += 1;
                let beat = HudMessage::Heartbeat(Heartbeat {
                    seq,
                    host_time_ns: started.elapsed().as_nanos() as u64,
                });
                if let Err(err) = send(conn, &beat) {
                    info!("HUD client went away: {err}");
                    stream = None;
                }
            }
        }

        if stream.is_none() {
            match listener.accept() {
                Ok((mut conn, addr)) => match greet(&mut conn, &build_info, &snapshot) {
                    Ok(()) => {
                        info!("HUD connected from {addr}");
                        last_beat = Instant::now();
                        stream = Some(conn);
                    }
                    Err(err) => warn!("HUD handshake error with {addr}: {err}"),
                },
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    warn!("HUD accept error: {err}");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
        connected.store(stream.is_some(), Ordering::SeqCst);
    }
    connected.store(false, Ordering::SeqCst);
    debug!("HUD worker finished");
}

fn greet(conn: &mut TcpStream, build_info: &str, snapshot: &Snapshot) -> io::Result<()> {
    conn.set_nonblocking(false)?;
    conn.set_nodelay(true)?;
    conn.set_write_timeout(Some(Duration::from_secs(1)))?;
    send(
        conn,
        &HudMessage::Hello(Hello::new("kiosk_engine", Some(build_info.to_string()))),
    )?;
    for message in snapshot.replay() {
        send(conn, &message)?;
    }
    Ok(())
}

fn send(conn: &mut TcpStream, message: &HudMessage) -> io::Result<()> {
    let bytes = message
        .encode()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    conn.write_all(&bytes)
}
