//! `mpv` driven over its JSON IPC socket.
//!
//! Commands are synchronous request/response pairs matched by
//! `request_id`. A reader thread routes replies back to the waiting caller
//! and turns `eof-reached` property changes into end-of-media callbacks.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::{json, Value};

use super::{EndListener, MediaEngine, MediaError, OutputSurface};

const EOF_OBSERVER_ID: u64 = 1;

#[derive(Debug, Clone)]
pub struct MpvOptions {
    pub program: PathBuf,
    pub socket: PathBuf,
    pub surface: OutputSurface,
    /// How long to wait for the IPC socket to appear after launch.
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl Default for MpvOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("mpv"),
            socket: std::env::temp_dir().join("kiosk-mpv.sock"),
            surface: OutputSurface::Display("HDMI-A-2".to_string()),
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_millis(500),
            extra_args: Vec::new(),
        }
    }
}

type Reply = Result<Value, MediaError>;

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Sender<Reply>>>,
    listener: Mutex<Option<EndListener>>,
    /// Set once the current file has loaded; cleared when a new file is
    /// requested so an end flag left over from the previous file is ignored.
    eof_armed: AtomicBool,
    looping: AtomicBool,
}

pub struct MpvEngine {
    child: Child,
    writer: Mutex<UnixStream>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    options: MpvOptions,
}

impl MpvEngine {
    pub fn launch(options: MpvOptions) -> Result<Self, MediaError> {
        // a stale socket from a previous run would make the connect succeed
        // against nothing
        let _ = std::fs::remove_file(&options.socket);

        let mut command = Command::new(&options.program);
        command
            .arg(format!("--input-ipc-server={}", options.socket.display()))
            .args([
                "--idle=yes",
                "--keep-open=yes",
                "--force-window=yes",
                "--fullscreen",
                "--no-osc",
                "--osd-level=0",
                "--no-input-default-bindings",
                "--no-terminal",
                "--cursor-autohide=always",
            ]);
        match &options.surface {
            OutputSurface::Display(name) => {
                command.arg(format!("--fs-screen-name={name}"));
            }
            OutputSurface::Window(id) => {
                command.arg(format!("--wid={id}"));
            }
        }
        command
            .args(&options.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        let mut child = command.spawn()?;

        let stream = match connect(&options.socket, options.connect_timeout) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        let reader = stream.try_clone()?;
        let shared = Arc::new(Shared::default());
        {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("mpv_ipc".to_string())
                .spawn(move || reader_loop(reader, shared))?;
        }
        info!(
            "mpv ready on {} (pid {})",
            options.socket.display(),
            child.id()
        );

        let engine = Self {
            child,
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(EOF_OBSERVER_ID + 1),
            shared,
            options,
        };
        engine.request(json!(["observe_property", EOF_OBSERVER_ID, "eof-reached"]))?;
        Ok(engine)
    }

    fn request(&self, command: Value) -> Result<Value, MediaError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.pending).insert(id, tx);

        let mut line = serde_json::to_vec(&json!({ "command": command, "request_id": id }))
            .map_err(|err| MediaError::Backend(err.to_string()))?;
        line.push(b'\n');
        if let Err(err) = lock(&self.writer).write_all(&line) {
            lock(&self.shared.pending).remove(&id);
            return Err(err.into());
        }

        match rx.recv_timeout(self.options.reply_timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.shared.pending).remove(&id);
                Err(MediaError::Timeout(
                    self.options.reply_timeout.as_millis() as u64
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err(MediaError::Disconnected),
        }
    }

    fn command(&self, command: Value) -> Result<(), MediaError> {
        self.request(command).map(|_| ())
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), MediaError> {
        self.command(json!(["set_property", name, value]))
    }

    fn get_f64(&self, name: &str) -> Option<f64> {
        match self.request(json!(["get_property", name])) {
            Ok(value) => value.as_f64(),
            Err(err) => {
                debug!("mpv {name} unavailable: {err}");
                None
            }
        }
    }

    fn load(&mut self, asset: &Path, looping: bool) -> Result<(), MediaError> {
        if !asset.is_file() {
            return Err(MediaError::MissingAsset(asset.to_path_buf()));
        }
        self.shared.looping.store(looping, Ordering::SeqCst);
        self.shared.eof_armed.store(false, Ordering::SeqCst);
        self.set_property("loop-file", json!(if looping { "inf" } else { "no" }))?;
        self.command(json!(["loadfile", asset.to_string_lossy(), "replace"]))?;
        self.set_property("pause", json!(false))
    }
}

impl MediaEngine for MpvEngine {
    fn play(&mut self, asset: &Path) -> Result<(), MediaError> {
        self.load(asset, false)
    }

    fn loop_play(&mut self, asset: &Path) -> Result<(), MediaError> {
        self.load(asset, true)
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.shared.eof_armed.store(false, Ordering::SeqCst);
        self.command(json!(["stop"]))
    }

    fn bind_output_surface(&mut self, surface: &OutputSurface) -> Result<(), MediaError> {
        match surface {
            OutputSurface::Display(name) => {
                self.set_property("fs-screen-name", json!(name))?;
                self.set_property("fullscreen", json!(true))
            }
            // embedding only takes effect for windows created after this
            OutputSurface::Window(id) => self.set_property("wid", json!(id)),
        }
    }

    fn length_ms(&self) -> u64 {
        self.get_f64("duration")
            .map(|secs| (secs * 1000.0).max(0.0) as u64)
            .unwrap_or(0)
    }

    fn time_ms(&self) -> u64 {
        self.get_f64("time-pos")
            .map(|secs| (secs * 1000.0).max(0.0) as u64)
            .unwrap_or(0)
    }

    fn frame_rate(&self) -> Option<f32> {
        self.get_f64("container-fps")
            .or_else(|| self.get_f64("estimated-vf-fps"))
            .map(|fps| fps as f32)
    }

    fn set_rate(&mut self, factor: f32) -> Result<(), MediaError> {
        self.set_property("speed", json!(factor))
    }

    fn set_position_fraction(&mut self, fraction: f32) -> Result<(), MediaError> {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0) as f64;
        self.command(json!(["seek", percent, "absolute-percent+exact"]))
    }

    fn set_time_ms(&mut self, ms: u64) -> Result<(), MediaError> {
        self.command(json!(["seek", ms as f64 / 1000.0, "absolute+exact"]))
    }

    fn pause(&mut self, paused: bool) -> Result<(), MediaError> {
        self.set_property("pause", json!(paused))
    }

    fn step_frame(&mut self) -> Result<(), MediaError> {
        self.command(json!(["frame-step"]))
    }

    fn set_output_visible(&mut self, visible: bool) -> Result<(), MediaError> {
        let level = if visible { 0 } else { -100 };
        self.set_property("brightness", json!(level))?;
        self.set_property("contrast", json!(level))
    }

    fn attach_end_listener(&mut self, listener: EndListener) {
        *lock(&self.shared.listener) = Some(listener);
    }

    fn detach_end_listener(&mut self) {
        lock(&self.shared.listener).take();
    }

    fn shutdown(&mut self) {
        self.detach_end_listener();
        if let Err(err) = self.command(json!(["quit"])) {
            debug!("mpv quit request failed: {err}");
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!("mpv exited with {status}");
                    break;
                }
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(50));
                }
                Ok(None) | Err(_) => {
                    warn!("mpv did not exit; killing it");
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break;
                }
            }
        }
        let _ = std::fs::remove_file(&self.options.socket);
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn connect(socket: &Path, timeout: Duration) -> Result<UnixStream, MediaError> {
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(socket) {
            Ok(stream) => return Ok(stream),
            Err(err) if Instant::now() < deadline => {
                debug!("waiting for mpv socket {}: {err}", socket.display());
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return Err(MediaError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

fn reader_loop(stream: UnixStream, shared: Arc<Shared>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("mpv IPC read failed: {err}");
                break;
            }
        };
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                debug!("ignoring malformed mpv message {line:?}: {err}");
                continue;
            }
        };
        dispatch(&shared, &message);
    }
    // dropping the senders wakes every waiting request with Disconnected
    lock(&shared.pending).clear();
    debug!("mpv IPC reader finished");
}

fn dispatch(shared: &Shared, message: &Value) {
    if let Some(id) = message.get("request_id").and_then(Value::as_u64) {
        let reply = match message.get("error").and_then(Value::as_str) {
            Some("success") | None => Ok(message.get("data").cloned().unwrap_or(Value::Null)),
            Some(error) => Err(MediaError::Backend(error.to_string())),
        };
        if let Some(waiter) = lock(&shared.pending).remove(&id) {
            let _ = waiter.send(reply);
        }
        return;
    }

    match message.get("event").and_then(Value::as_str) {
        Some("file-loaded") => shared.eof_armed.store(true, Ordering::SeqCst),
        Some("property-change")
            if message.get("name").and_then(Value::as_str) == Some("eof-reached") =>
        {
            let reached = message.get("data").and_then(Value::as_bool).unwrap_or(false);
            if reached
                && !shared.looping.load(Ordering::SeqCst)
                && shared.eof_armed.swap(false, Ordering::SeqCst)
            {
                let listener = lock(&shared.listener).clone();
                match listener {
                    Some(listener) => listener(),
                    None => debug!("end of media with no listener attached"),
                }
            }
        }
        _ => {}
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(shared: &Shared) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        *lock(&shared.listener) = Some(Arc::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    fn eof(reached: bool) -> Value {
        json!({ "event": "property-change", "id": 1, "name": "eof-reached", "data": reached })
    }

    #[test]
    fn end_fires_once_per_loaded_file() {
        let shared = Shared::default();
        let count = counting_listener(&shared);

        // left over from a previous file: not armed yet
        dispatch(&shared, &eof(true));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatch(&shared, &json!({ "event": "file-loaded" }));
        dispatch(&shared, &eof(false));
        dispatch(&shared, &eof(true));
        dispatch(&shared, &eof(true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn looping_playback_never_reports_an_end() {
        let shared = Shared::default();
        let count = counting_listener(&shared);
        shared.looping.store(true, Ordering::SeqCst);
        dispatch(&shared, &json!({ "event": "file-loaded" }));
        dispatch(&shared, &eof(true));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replies_are_routed_by_request_id() {
        let shared = Shared::default();
        let (tx, rx) = mpsc::channel();
        lock(&shared.pending).insert(7, tx);
        dispatch(
            &shared,
            &json!({ "request_id": 7, "error": "property unavailable" }),
        );
        assert!(matches!(rx.recv(), Ok(Err(MediaError::Backend(ref msg))) if msg == "property unavailable"));
        assert!(lock(&shared.pending).is_empty());
    }
}
