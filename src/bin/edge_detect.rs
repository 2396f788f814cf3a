//! edge_detect - capture a camera frame, detect objects, annotate and log
//!
//! Each iteration:
//! 1. Captures one frame and writes it to the input path
//! 2. Fits the image into the model input and runs inference `count` times
//! 3. Appends timings and detections to the two run logs
//! 4. Draws boxes and labels and writes the annotated image
//!
//! Runs until the iteration limit is reached or Ctrl-C is pressed.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use edge_detect::{ConfigOverrides, ErrorClass, IterationOutcome, Pipeline, RunConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File path of the detection model (.onnx, or a JSON script for --backend stub).
    #[arg(short, long)]
    model: Option<PathBuf>,
    /// File path of the image to process; captured frames are written here.
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// File path of the labels file (empty to disable).
    #[arg(short, long)]
    labels: Option<String>,
    /// Score threshold for detected objects.
    #[arg(short, long)]
    threshold: Option<f32>,
    /// File path for the result image with annotations (empty to disable).
    #[arg(short, long)]
    output: Option<String>,
    /// Number of times to run inference per iteration.
    #[arg(short, long)]
    count: Option<u32>,
    /// Camera index, device path, stub://<name>, or none.
    #[arg(long)]
    camera: Option<String>,
    /// Iterations to run; 0 runs until interrupted.
    #[arg(long)]
    iterations: Option<u64>,
    /// Pause between iterations in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Per-invocation timing log.
    #[arg(long)]
    timing_log: Option<PathBuf>,
    /// Per-object detail log.
    #[arg(long)]
    detail_log: Option<PathBuf>,
    /// Inference backend (tract|stub).
    #[arg(long)]
    backend: Option<String>,
    /// Model input width in pixels.
    #[arg(long)]
    input_width: Option<u32>,
    /// Model input height in pixels.
    #[arg(long)]
    input_height: Option<u32>,
    /// Feed the model f32 input scaled to [0, 1] instead of u8.
    #[arg(long)]
    float_input: bool,
    /// Open the annotated image in the desktop viewer.
    #[arg(long)]
    show: bool,
    /// JSON or TOML config file.
    #[arg(long, env = "EDGE_DETECT_CONFIG")]
    config: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            model: self.model.clone(),
            labels: self.labels.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            threshold: self.threshold,
            count: self.count,
            camera: self.camera.clone(),
            iterations: self.iterations,
            interval_ms: self.interval_ms,
            timing_log: self.timing_log.clone(),
            detail_log: self.detail_log.clone(),
            backend: self.backend.clone(),
            input_width: self.input_width,
            input_height: self.input_height,
            float_input: self.float_input,
            show: self.show,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let class = ErrorClass::of(&err);
            log::error!("{:?} error: {:#}", class, err);
            ExitCode::from(class.exit_code() as u8)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let config = {
        let _stage = ui.stage("load configuration");
        RunConfig::load(args.overrides())?
    };
    log::info!(
        "model={} threshold={} count={} iterations={}",
        config.model.display(),
        config.threshold,
        config.count,
        if config.iterations == 0 {
            "until interrupted".to_string()
        } else {
            config.iterations.to_string()
        }
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let mut pipeline = {
        let _stage = ui.stage("open model, labels and camera");
        Pipeline::open(config)?
    };

    let progress = ui.iterations(pipeline.config().iterations);
    let summary = pipeline.run_with(&cancel, |outcome| match outcome {
        IterationOutcome::Completed(done) => {
            progress.completed(done.detections.len(), done.timings.last().copied())
        }
        IterationOutcome::Skipped(_) => progress.skipped(),
    })?;
    drop(progress);

    if summary.cancelled {
        log::info!("shutdown signal received, stopped after {} iteration(s)", summary.completed);
    }
    println!("edge_detect summary:");
    println!("  iterations completed: {}", summary.completed);
    println!("  iterations skipped (capture failed): {}", summary.skipped);
    if let Some(last) = &summary.last {
        println!("  objects in last iteration: {}", last.detections.len());
        if let Some(path) = &last.annotated {
            println!("  annotated image: {}", path.display());
        }
    }
    println!("  timing log: {}", pipeline.config().timing_log.display());
    println!("  detail log: {}", pipeline.config().detail_log.display());
    Ok(())
}
