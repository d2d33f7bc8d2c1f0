//! tallyd - live object tally daemon
//!
//! Loads a detector once, then runs detection sessions against the configured source:
//! 1. With the dashboard (default): waits for Start in the browser, runs until Stop,
//!    a failure, or Ctrl-C, then waits again.
//! 2. Headless (`--headless`): runs a single session straight away and logs counts.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use object_tally::config::TallyConfig;
use object_tally::ui::{Ui, UiMode};
use object_tally::{
    build_source, ControlHandle, DashboardConfig, DashboardServer, DetectionLoop, Detector,
    DetectorRegistry, DisplaySink, LogSink, LoopError, LoopState, RunLimits, SharedDetector,
    StubDetector,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file.
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,
    /// Video source: webcam index, /dev/videoN, stub://name or an image directory.
    #[arg(long)]
    source: Option<String>,
    /// Detector backend name.
    #[arg(long)]
    backend: Option<String>,
    /// Dashboard listen address.
    #[arg(long)]
    dashboard_addr: Option<String>,
    /// Run one session without the dashboard, logging counts.
    #[arg(long)]
    headless: bool,
    /// Stop each session after this many frames.
    #[arg(long)]
    frames: Option<u64>,
    /// Terminal output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = TallyConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.uri = source;
    }
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend.to_lowercase();
    }
    if let Some(addr) = args.dashboard_addr {
        cfg.dashboard.addr = addr;
    }

    let ui = Ui::new(
        args.ui,
        std::io::stderr().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    );

    // building is side-effect free; opening happens per session
    if let Err(err) = build_source(&cfg.source) {
        log::warn!(
            "source '{}' cannot be used, sessions will fail until it is fixed: {:#}",
            cfg.source.uri,
            err
        );
    }

    let mut registry = build_registry(&cfg);
    log::info!("detector backends: {}", registry.list().join(", "));
    let detector = {
        let stage = ui.stage(&format!("loading detector '{}'", cfg.detector.backend));
        match registry.get_or_load(&cfg.detector.backend) {
            Ok(detector) => detector,
            Err(err) => {
                stage.fail();
                return Err(err);
            }
        }
    };

    let control = ControlHandle::new(cfg.parameters);
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let control = control.clone();
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            control.request_stop();
        })
        .context("error setting Ctrl-C handler")?;
    }

    let limits = RunLimits {
        cycle_interval: cfg.cycle_interval,
        max_cycles: args.frames.or(cfg.max_cycles),
    };

    if args.headless {
        control.request_run();
        let cycles = run_session(&cfg, &detector, LogSink::new(), &control, &limits)?;
        log::info!("tallyd finished after {} cycles", cycles);
        return Ok(());
    }

    let dashboard = DashboardServer::new(
        DashboardConfig {
            addr: cfg.dashboard.addr.clone(),
            jpeg_quality: cfg.dashboard.jpeg_quality,
        },
        control.clone(),
        &cfg.tracked_labels,
    )
    .spawn()?;
    log::info!(
        "tallyd ready: open http://{} and press start (Ctrl-C to quit)",
        dashboard.addr
    );

    while !shutdown.load(Ordering::SeqCst) {
        if !control.run_requested() {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }
        match run_session(&cfg, &detector, dashboard.sink(), &control, &limits) {
            Ok(cycles) => log::info!("session ended after {} cycles", cycles),
            Err(err) => log::warn!("session ended: {:#}", err),
        }
        control.request_stop();
    }

    log::info!("shutdown signal received, stopping dashboard...");
    dashboard.stop()?;
    Ok(())
}

fn build_registry(cfg: &TallyConfig) -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register("stub", || Ok(Box::new(StubDetector::new()) as Box<dyn Detector>));

    #[cfg(feature = "backend-tract")]
    {
        let settings = cfg.detector.clone();
        registry.register("tract", move || {
            let model_path = settings
                .model_path
                .clone()
                .ok_or_else(|| anyhow::anyhow!("tract backend requires detector.model_path"))?;
            let labels_path = settings
                .labels_path
                .clone()
                .unwrap_or_else(|| model_path.with_extension("names"));
            let detector =
                object_tally::TractDetector::new(&model_path, &labels_path, settings.input_size)?;
            Ok(Box::new(detector) as Box<dyn Detector>)
        });
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        if cfg.detector.backend == "tract" {
            log::warn!("tract backend requested but tallyd was built without backend-tract");
        }
    }

    registry
}

/// One start/run/stop cycle against a freshly built source.
fn run_session<K: DisplaySink>(
    cfg: &TallyConfig,
    detector: &SharedDetector,
    mut sink: K,
    control: &ControlHandle,
    limits: &RunLimits,
) -> Result<u64> {
    let source = match build_source(&cfg.source) {
        Ok(source) => source,
        Err(err) => {
            let err = LoopError::SourceUnavailable {
                source_name: cfg.source.uri.clone(),
                reason: format!("{:#}", err),
            };
            sink.publish_status(LoopState::Stopped, Some(&err));
            return Err(err.into());
        }
    };

    let mut detection_loop = DetectionLoop::new(
        source,
        detector.clone(),
        sink,
        control.parameters(),
        cfg.tracked_labels.clone(),
    )
    .with_control(control.clone());
    detection_loop.start()?;
    let cycles = detection_loop.run(limits)?;
    Ok(cycles)
}
