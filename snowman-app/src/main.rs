//! Snowman command-line host.
//!
//! Opens a microphone (or replays a WAV file), runs the detection pipeline
//! and prints a timestamped line for every hotword until the source ends or
//! Ctrl-C is pressed.

mod settings;

use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use snowman_core::{
    audio::list_input_devices, AudioSource, ConversionMode, DetectionEvent, DetectorHandle,
    EngineStatus, ExitReason, OverflowPolicy, SnowmanEngine, StubConfig, StubDetector,
};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{info, warn};

use settings::{default_settings_path, load_settings, save_settings, AppSettings};

#[derive(Parser, Debug)]
#[command(name = "snowman")]
#[command(about = "Streaming hotword detection from a microphone or WAV file", long_about = None)]
struct Args {
    /// Settings file (default: platform data directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Replay this WAV file instead of opening a microphone.
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Pace WAV replay in real time.
    #[arg(long, requires = "wav")]
    realtime: bool,

    /// Preferred input device name.
    #[arg(long)]
    device: Option<String>,

    /// List input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Detector resource file.
    #[arg(long)]
    resource: Option<PathBuf>,

    /// Hotword model file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Sensitivity per hotword, comma separated (e.g. `0.5` or `0.4,0.6`).
    #[arg(long)]
    sensitivity: Option<String>,

    #[arg(long)]
    audio_gain: Option<f32>,

    /// Send float samples to the detector instead of 16-bit fixed point.
    #[arg(long)]
    passthrough: bool,

    /// Discard incoming blocks instead of the oldest queued ones when the
    /// detector falls behind.
    #[arg(long)]
    drop_newest: bool,

    /// Print hotword events and the session summary as JSON lines.
    #[arg(long)]
    json: bool,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(device) = &self.device {
            settings.preferred_input_device = Some(device.clone());
        }
        if let Some(resource) = &self.resource {
            settings.resource_path = resource.clone();
        }
        if let Some(model) = &self.model {
            settings.model_path = model.clone();
        }
        if let Some(sensitivity) = &self.sensitivity {
            settings.sensitivity = sensitivity.clone();
        }
        if let Some(gain) = self.audio_gain {
            settings.audio_gain = gain;
        }
        if self.passthrough {
            settings.conversion = ConversionMode::Passthrough;
        }
        if self.drop_newest {
            settings.overflow_policy = OverflowPolicy::DropNewest;
        }
        settings.normalize();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("snowman=info,snowman_core=info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in list_input_devices() {
            println!(
                "{}{}  ({} Hz, {} ch)",
                if device.is_default { "* " } else { "  " },
                device.name,
                device.default_sample_rate.map_or("?".into(), |r| r.to_string()),
                device.channels.map_or("?".into(), |c| c.to_string()),
            );
        }
        return Ok(());
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    args.apply_to(&mut app_settings);
    info!(
        settings_path = ?settings_path,
        resource = ?app_settings.resource_path,
        model = ?app_settings.model_path,
        sensitivity = %app_settings.sensitivity,
        conversion = ?app_settings.conversion,
        overflow = ?app_settings.overflow_policy,
        "settings loaded"
    );
    if args.save_settings {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("saving settings to {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }

    // ── Engine setup ──────────────────────────────────────────────────────
    let detector = StubDetector::create(
        &app_settings.resource_path,
        &app_settings.model_path,
        StubConfig::default(),
    )
    .context("creating detector")?;
    let engine = Arc::new(SnowmanEngine::new(
        app_settings.engine_config(),
        DetectorHandle::new(detector),
    ));

    let source = match &args.wav {
        Some(path) => AudioSource::Wav {
            path: path.clone(),
            realtime: args.realtime,
        },
        None => AudioSource::Microphone {
            preferred_device: app_settings.preferred_input_device.clone(),
        },
    };

    let mut detections = engine.subscribe_detections();
    let mut hotwords = engine.subscribe_hotwords();
    let mut status = engine.subscribe_status();
    engine.start(source).context("starting engine")?;
    println!("Listening... press Ctrl-C to stop");

    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            if let Err(e) = stopper.stop() {
                warn!("stop failed: {e}");
            }
        }
    });

    // ── Result loop ───────────────────────────────────────────────────────
    let mut printer = ResultPrinter::new(args.json);
    let mut session = pin!(engine.wait());
    let reason = loop {
        tokio::select! {
            reason = &mut session => break reason,
            event = hotwords.recv() => match event {
                Ok(event) => printer.print(&event),
                Err(RecvError::Lagged(n)) => warn!(missed = n, "hotword printer fell behind"),
                Err(RecvError::Closed) => {}
            },
            event = detections.recv() => match event {
                Ok(event) => printer.note(&event),
                // Per-block results only feed the "latest result" line.
                Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => {}
            },
        }
    };
    printer.drain(&mut hotwords, &mut detections);

    let snapshot = engine.diagnostics_snapshot();
    info!(?snapshot, "session diagnostics");
    if args.json {
        println!("{}", serde_json::to_string(&snapshot)?);
    }
    println!(
        "{} hotword(s) in {} block(s); last result {}",
        snapshot.hotwords,
        snapshot.blocks_received,
        printer.last_code.map_or("none".into(), |c| c.to_string()),
    );

    if reason == Some(ExitReason::Fatal) || engine.status() == EngineStatus::Error {
        let detail = last_status_detail(&mut status).unwrap_or_else(|| "unknown error".into());
        bail!("session aborted: {detail}");
    }
    Ok(())
}

struct ResultPrinter {
    json: bool,
    last_code: Option<i32>,
}

impl ResultPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_code: None,
        }
    }

    /// Track the latest per-block result.
    fn note(&mut self, event: &DetectionEvent) {
        self.last_code = Some(event.code);
    }

    fn print(&mut self, event: &DetectionEvent) {
        self.note(event);
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("failed to encode event: {e}"),
            }
        } else if let Some(hotword) = event.hotword {
            println!(
                "{} detected hotword {}",
                chrono::Local::now().format("%H:%M:%S"),
                hotword
            );
        }
    }

    fn drain(
        &mut self,
        hotwords: &mut broadcast::Receiver<DetectionEvent>,
        detections: &mut broadcast::Receiver<DetectionEvent>,
    ) {
        loop {
            match hotwords.try_recv() {
                Ok(event) => self.print(&event),
                Err(TryRecvError::Lagged(n)) => warn!(missed = n, "hotword printer fell behind"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        loop {
            match detections.try_recv() {
                Ok(event) => self.note(&event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

fn last_status_detail(
    rx: &mut broadcast::Receiver<snowman_core::EngineStatusEvent>,
) -> Option<String> {
    let mut detail = None;
    while let Ok(event) = rx.try_recv() {
        if event.status == EngineStatus::Error {
            detail = event.detail;
        }
    }
    detail
}
