use anyhow::{anyhow, Context, Result};
use balance_core::{BalanceSettings, FrameSource, Position};
use balance_executor::{Executor, ExecutorConfig, ShutdownReason};
use balance_logger::SessionRecorder;
use balance_vision::{
    ClassicalBackend, CommandFrameSource, DetectorBackend, DirectoryFrameSource,
    InferenceWorker, LearnedBackend,
};
use clap::{Parser, ValueEnum};
use std::{
    io::{BufRead, IsTerminal},
    path::PathBuf,
    process::ExitCode,
    str::FromStr,
};
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod setpoints;
mod utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Mode {
    /// Classical contour and ellipse tracker
    Cv,
    /// Learned detector running in a worker process
    Dl,
}

#[derive(Debug, Parser)]
#[command(name = "balance-cli")]
pub(crate) struct Args {
    /// Target position as `X Y`, in normalized frame pixels
    #[clap(value_name = "SETPOINT", allow_negative_numbers = true)]
    setpoints: Vec<String>,

    #[clap(long, short, default_value = "cv")]
    mode: Mode,

    /// Replay frames from a directory instead of the camera
    #[clap(long)]
    frames: Option<PathBuf>,

    /// Restart the replay when the last frame has been played
    #[clap(long, default_value = "false")]
    loop_frames: bool,

    #[clap(long, default_value = "auto")]
    serial_port: String,

    /// Record frames and labels of the session
    #[clap(long, default_value = "false")]
    record: bool,

    /// Weights for the learned detector
    #[clap(long)]
    model: Option<PathBuf>,

    #[clap(long, default_value = "balance-settings.json")]
    settings_file: PathBuf,

    #[clap(long, default_value = "info")]
    log_level: String,

    #[clap(long, default_value = "auto")]
    log_file: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _guard = setup_logging(&args)?;

    let outcome = run(args).await;
    match &outcome {
        Ok(reason) if !reason.is_clean() => {
            tracing::error!("Session ended with a {}", reason);
        }
        Err(err) => tracing::error!("Session failed: {:?}", err),
        Ok(_) => {}
    }
    Ok(ExitCode::from(exit_status(&outcome)))
}

/// 0 after a stop request or the end of the frames, 1 after any failure.
fn exit_status(outcome: &Result<ShutdownReason>) -> u8 {
    match outcome {
        Ok(reason) if reason.is_clean() => 0,
        _ => 1,
    }
}

fn setup_logging(args: &Args) -> Result<WorkerGuard> {
    // Set up log file
    let log_file_path = if args.log_file != "auto" {
        let path = PathBuf::from(args.log_file.clone());
        if path.exists() {
            eprintln!("Log file already exists: {}", path.display());
            std::process::exit(1);
        }
        path
    } else {
        let time = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let filename = format!("balance-{time}.log");
        dirs::data_local_dir()
            .map(|p| p.join("balance").join(&filename))
            .unwrap_or_else(|| PathBuf::from(&filename))
    };
    let dir = match log_file_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let file_name = log_file_path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file: {}", log_file_path.display()))?;

    // Create log file appender
    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(appender);

    // Set up tracing
    let log_level = match tracing::Level::from_str(&args.log_level) {
        Ok(level) => level,
        Err(_) => {
            eprintln!("Invalid log level: {}", args.log_level);
            std::process::exit(1);
        }
    };
    let stdout_layer = fmt::Subscriber::builder()
        .with_max_level(log_level)
        .without_time()
        .finish();
    let logfile_layer = fmt::Layer::default()
        .json()
        .with_ansi(false)
        .with_writer(non_blocking_appender);
    stdout_layer
        .with(logfile_layer)
        .try_init()
        .context("Unable to set global tracing subscriber")?;

    tracing::info!("Saving logs to {}", log_file_path.display());
    Ok(guard)
}

async fn run(args: Args) -> Result<ShutdownReason> {
    let mut settings = BalanceSettings::load_or_insert(&args.settings_file)?;

    let defaults = Position::new(settings.controller.x_setpoint, settings.controller.y_setpoint);
    let setpoint = setpoints::parse_setpoints(&args.setpoints, defaults);
    settings.controller.x_setpoint = setpoint.x;
    settings.controller.y_setpoint = setpoint.y;
    if let Some(model) = &args.model {
        settings.inference.model_path = model.clone();
    }
    if args.record {
        settings.recorder.enabled = true;
    }
    tracing::info!("Setpoint: X = {}, Y = {}", setpoint.x, setpoint.y);

    let source: Box<dyn FrameSource> = match &args.frames {
        Some(dir) => Box::new(DirectoryFrameSource::open(dir, args.loop_frames)?),
        None => Box::new(CommandFrameSource::spawn(&settings.camera)?),
    };
    let backend: Box<dyn DetectorBackend> = match args.mode {
        Mode::Cv => Box::new(ClassicalBackend::new(
            settings.normalization.clone(),
            settings.tracker.clone(),
        )),
        Mode::Dl => {
            let worker = InferenceWorker::spawn(&settings.inference)
                .context("Failed to start the inference worker")?;
            Box::new(LearnedBackend::new(
                settings.normalization.clone(),
                Box::new(worker),
            ))
        }
    };
    let actuator = utils::setup_actuator(&args.serial_port, &settings.actuator)?;
    let recorder = if settings.recorder.enabled {
        Some(SessionRecorder::create(&settings.recorder)?)
    } else {
        None
    };

    let config = ExecutorConfig {
        filter: settings.filter.clone(),
        controller: settings.controller.clone(),
        loop_settings: settings.loop_settings.clone(),
    };
    let mut executor = Executor::new(config, source, backend, actuator, recorder);

    let (stop_tx, stop_rx) = broadcast::channel(1);
    spawn_quit_listener(stop_tx.clone());
    let mut main_task = tokio::task::spawn_blocking(move || executor.run(stop_rx));

    let result = tokio::select! {
        result = &mut main_task => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                tracing::error!("Failed to listen for ctrl-c: {}", err);
            }
            tracing::info!("Shutting down");
            stop_tx.send(()).ok();
            main_task.await
        }
    };
    result.context("Executor task failed")?
}

/// Request a stop when `q` is entered on an interactive terminal.
fn spawn_quit_listener(stop_tx: broadcast::Sender<()>) {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return;
    }
    tracing::info!("Press q and Enter to stop");
    std::thread::spawn(move || {
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    stop_tx.send(()).ok();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}
