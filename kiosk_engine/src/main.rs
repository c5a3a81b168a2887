use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

use kiosk_engine::actions::{ActionGuard, ActionTable};
use kiosk_engine::buttons::{GpioButtons, StdinButtons};
use kiosk_engine::cli::{Args, ButtonSource};
use kiosk_engine::controller::{Controller, ControllerConfig};
use kiosk_engine::gate::{self, Gate};
use kiosk_engine::graph::StateGraph;
use kiosk_engine::hardware::{
    CueOutput, Hardware, HardwareBus, NullBus, NullCues, OscCues, SerialBus, SshWorkers,
};
use kiosk_engine::launcher::HudLauncher;
use kiosk_engine::media::{MpvEngine, MpvOptions, OutputSurface};
use kiosk_engine::overlay::{HudServer, NullOverlay, OverlayDisplay};
use kiosk_engine::tail_seek::TailSeekConfig;

const WORKER_SETTLE: Duration = Duration::from_secs(10);

enum Buttons {
    Gpio(GpioButtons),
    Stdin(StdinButtons),
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    args.validate()?;
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let graph = StateGraph::from_json_file(&args.states, args.asset_roots())
        .with_context(|| format!("loading state graph {}", args.states.display()))?;
    let report = graph
        .validate()
        .context("validating state graph assets")?;
    if !report.is_clean() {
        warn!(
            "{} missing videos, {} dangling transitions",
            report.missing_videos.len(),
            report.dangling_transitions.len()
        );
    }
    info!("loaded {} states from {}", graph.len(), args.states.display());

    let mut table = ActionTable::from_json_file(&args.actions)
        .with_context(|| format!("loading action table {}", args.actions.display()))?;
    if let Some(gap) = args.serial_gap() {
        table.serial_gap_ms = gap.as_millis() as u64;
    }
    table.unknown_states(&graph);

    let (hardware, workers) = build_hardware(&args);
    let (gate, mut rx) = Gate::channel();

    let overlay: Arc<dyn OverlayDisplay> =
        match HudServer::bind(&args.hud_bind, Some(env!("CARGO_PKG_VERSION").to_string())) {
            Ok(server) => Arc::new(server),
            Err(err) => {
                warn!("HUD disabled: {err:#}");
                Arc::new(NullOverlay)
            }
        };
    let launcher = launch_hud(&args);

    let surface = OutputSurface::Display(args.video_display.clone());
    let media = MpvEngine::launch(MpvOptions {
        program: args.mpv.clone(),
        socket: args.mpv_socket.clone(),
        surface: surface.clone(),
        ..MpvOptions::default()
    })
    .with_context(|| format!("launching {}", args.mpv.display()))?;

    let mut controller = Controller::new(
        Arc::new(graph),
        Box::new(media),
        overlay,
        ActionGuard::new(table, hardware),
        gate.clone(),
        ControllerConfig {
            inactivity: args.inactivity(),
            tail_seek: TailSeekConfig::default(),
            surface: Some(surface),
        },
    );

    tokio::spawn(forward_signals(gate.clone()));
    let buttons = spawn_buttons(&args, &gate)?;

    controller.start();
    let exit = gate::run(&mut controller, &mut rx).await;
    info!("runner stopped ({exit:?}); cleaning up");

    match buttons {
        Buttons::Gpio(buttons) => buttons.shutdown().await,
        Buttons::Stdin(buttons) => buttons.shutdown(),
        Buttons::Off => {}
    }
    controller.shutdown();
    if let Some(workers) = workers {
        workers.settle(WORKER_SETTLE).await;
    }
    if let Some(launcher) = launcher {
        launcher.shutdown().await;
    }
    Ok(())
}

fn build_hardware(args: &Args) -> (Hardware, Option<Arc<SshWorkers>>) {
    if args.no_hardware {
        info!("hardware disabled");
        return (Hardware::null(), None);
    }

    let bus: Arc<dyn HardwareBus> = match SerialBus::open(args.serial()) {
        Ok(bus) => Arc::new(bus),
        Err(err) => {
            warn!("serial disabled: {err}");
            Arc::new(NullBus)
        }
    };
    let workers = Arc::new(SshWorkers::new(args.workers()));
    let cues: Arc<dyn CueOutput> = match OscCues::connect(args.osc_target()) {
        Ok(cues) => Arc::new(cues),
        Err(err) => {
            warn!("OSC init failed: {err}");
            Arc::new(NullCues)
        }
    };
    let hardware = Hardware {
        bus,
        workers: workers.clone(),
        cues,
    };
    (hardware, Some(workers))
}

fn launch_hud(args: &Args) -> Option<HudLauncher> {
    let argv = args.hud_argv();
    if argv.is_empty() {
        return None;
    }
    match HudLauncher::launch(&argv) {
        Ok(launcher) => Some(launcher),
        Err(err) => {
            warn!("HUD launcher failed: {err}");
            None
        }
    }
}

fn spawn_buttons(args: &Args, gate: &Gate) -> Result<Buttons> {
    let buttons = match args.buttons {
        ButtonSource::Gpio => Buttons::Gpio(
            GpioButtons::spawn(args.gpio(), args.debounce(), gate.clone())
                .context("starting GPIO button monitor")?,
        ),
        ButtonSource::Stdin => Buttons::Stdin(StdinButtons::spawn(args.debounce(), gate.clone())),
        ButtonSource::None => {
            info!("no button input configured");
            Buttons::Off
        }
    };
    Ok(buttons)
}

async fn forward_signals(gate: Gate) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!("SIGTERM handler unavailable: {err}");
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("SIGINT handler failed: {err}");
                return;
            }
            info!("interrupt received");
        }
        _ = sigterm => info!("terminate received"),
    }
    gate.shutdown();
}
