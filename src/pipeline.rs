//! Capture, infer, report, annotate.
//!
//! One `Pipeline` owns every resource of a run: the label map, the inference
//! engine, the camera and the two log writers. `run_once` executes a single
//! iteration; `run` repeats it until the iteration limit is reached or the
//! cancellation flag is raised.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::annotate;
use crate::config::{BackendKind, RunConfig};
use crate::detect::{DetectorBackend, Detection, InferenceEngine, StubBackend};
use crate::error::{CaptureError, ConfigError};
use crate::ingest::CameraSource;
use crate::labels::LabelMap;
use crate::report::ReportWriter;

/// Result of one iteration.
#[derive(Debug)]
pub enum IterationOutcome {
    Completed(IterationSummary),
    /// The camera read failed; nothing downstream ran for this iteration.
    Skipped(CaptureError),
}

#[derive(Debug, Clone)]
pub struct IterationSummary {
    /// 1-based iteration number.
    pub iteration: u64,
    /// Detections of the last invocation.
    pub detections: Vec<Detection>,
    /// One entry per invocation.
    pub timings: Vec<Duration>,
    pub image_size: (u32, u32),
    pub annotated: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: u64,
    pub skipped: u64,
    pub cancelled: bool,
    pub last: Option<IterationSummary>,
}

pub struct Pipeline {
    config: RunConfig,
    labels: LabelMap,
    engine: InferenceEngine,
    camera: Option<CameraSource>,
    report: ReportWriter<BufWriter<File>>,
    iteration: u64,
}

/// Construct the backend named by the configuration.
pub fn open_backend(config: &RunConfig) -> Result<Box<dyn DetectorBackend>> {
    match config.backend {
        BackendKind::Stub => Ok(Box::new(StubBackend::from_script(&config.model)?)),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => {
            use crate::detect::TractBackend;
            let backend = if config.float_input {
                TractBackend::with_float_input(&config.model, config.input_size)?
            } else {
                TractBackend::new(&config.model, config.input_size)?
            };
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(ConfigError::Unavailable("tract backend", "backend-tract").into()),
    }
}

impl Pipeline {
    /// Acquire every resource named by `config`.
    pub fn open(config: RunConfig) -> Result<Self> {
        let labels = match &config.labels {
            Some(path) => LabelMap::load(path)?,
            None => LabelMap::empty(),
        };
        let backend = open_backend(&config)?;
        let camera = match &config.camera {
            Some(camera) => Some(open_camera(camera.clone())?),
            None => None,
        };
        Self::with_parts(config, labels, backend, camera)
    }

    /// Assemble a pipeline from already acquired parts.
    pub fn with_parts(
        config: RunConfig,
        labels: LabelMap,
        backend: Box<dyn DetectorBackend>,
        camera: Option<CameraSource>,
    ) -> Result<Self> {
        let mut engine = InferenceEngine::from_boxed(backend);
        engine.warm_up()?;
        let report = ReportWriter::create(&config.timing_log, &config.detail_log)?;
        log::info!(
            "pipeline ready: backend={} input={}x{} labels={} camera={}",
            engine.backend_name(),
            engine.input_size().width,
            engine.input_size().height,
            labels.len(),
            config
                .camera
                .as_ref()
                .map(|c| c.device.node())
                .unwrap_or_else(|| "none".into())
        );
        Ok(Self {
            config,
            labels,
            engine,
            camera,
            report,
            iteration: 0,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Run a single capture/infer/report/annotate iteration.
    pub fn run_once(&mut self) -> Result<IterationOutcome> {
        self.iteration += 1;
        let iteration = self.iteration;

        if let Some(camera) = self.camera.as_mut() {
            let captured = camera
                .next_frame()
                .and_then(|frame| frame.save(&self.config.input));
            if let Err(err) = captured {
                log::warn!("iteration {}: capture failed, skipping: {}", iteration, err);
                return Ok(IterationOutcome::Skipped(err));
            }
        }

        let image = image::open(&self.config.input)
            .with_context(|| format!("failed to load image {}", self.config.input.display()))?
            .to_rgb8();
        let scale = self.engine.set_resized_input(&image)?;

        let mut timings = Vec::with_capacity(self.config.count as usize);
        let mut detections = Vec::new();
        for _ in 0..self.config.count {
            let elapsed = self.engine.invoke()?;
            detections = self.engine.get_objects(self.config.threshold, scale)?;
            self.report.record_timing(elapsed)?;
            timings.push(elapsed);
        }
        log::debug!(
            "iteration {}: {} invocation(s), last {:.2} ms",
            iteration,
            timings.len(),
            timings.last().map_or(0.0, |t| t.as_secs_f64() * 1000.0)
        );

        self.report.record_detections(&detections, &self.labels)?;
        for det in &detections {
            log::info!(
                "iteration {}: {} (id={}) score={:.2} bbox=({}, {}, {}, {})",
                iteration,
                self.labels.resolve(det.class_id),
                det.class_id,
                det.score,
                det.bbox.xmin,
                det.bbox.ymin,
                det.bbox.xmax,
                det.bbox.ymax
            );
        }

        let image_size = image.dimensions();
        let annotated = match &self.config.output {
            Some(output) => {
                let mut canvas = image;
                annotate::draw_objects(&mut canvas, &detections, &self.labels);
                annotate::save(&canvas, output)?;
                if self.config.show {
                    if let Err(err) = annotate::show(output) {
                        log::warn!("{}", err);
                    }
                }
                Some(output.clone())
            }
            None => None,
        };

        Ok(IterationOutcome::Completed(IterationSummary {
            iteration,
            detections,
            timings,
            image_size,
            annotated,
        }))
    }

    /// Repeat iterations until the limit is reached or `cancel` is raised.
    pub fn run(&mut self, cancel: &AtomicBool) -> Result<RunSummary> {
        self.run_with(cancel, |_| {})
    }

    /// Like `run`, calling `observe` after every iteration.
    pub fn run_with<F>(&mut self, cancel: &AtomicBool, mut observe: F) -> Result<RunSummary>
    where
        F: FnMut(&IterationOutcome),
    {
        let mut summary = RunSummary::default();
        let result = self.run_loop(cancel, &mut summary, &mut observe);
        // Flush on every exit path, including errors.
        let flushed = self.report.flush();
        result?;
        flushed?;

        if let Some(camera) = &self.camera {
            let stats = camera.stats();
            log::info!(
                "camera {}: frames={} read_failures={}",
                stats.device,
                stats.frames_captured,
                stats.read_failures
            );
        }
        log::info!(
            "run finished: completed={} skipped={} cancelled={} invocations={}",
            summary.completed,
            summary.skipped,
            summary.cancelled,
            self.engine.invocations()
        );
        Ok(summary)
    }

    fn run_loop(
        &mut self,
        cancel: &AtomicBool,
        summary: &mut RunSummary,
        observe: &mut dyn FnMut(&IterationOutcome),
    ) -> Result<()> {
        loop {
            if cancel.load(Ordering::SeqCst) {
                summary.cancelled = true;
                return Ok(());
            }
            let attempted = summary.completed + summary.skipped;
            if self.config.iterations > 0 && attempted >= self.config.iterations {
                return Ok(());
            }

            let outcome = self
                .run_once()
                .with_context(|| format!("iteration {}", self.iteration))?;
            observe(&outcome);
            match outcome {
                IterationOutcome::Completed(done) => {
                    summary.completed += 1;
                    summary.last = Some(done);
                }
                IterationOutcome::Skipped(_) => summary.skipped += 1,
            }

            if !self.config.interval.is_zero() && pause(self.config.interval, cancel) {
                summary.cancelled = true;
                return Ok(());
            }
        }
    }
}

fn open_camera(config: crate::ingest::CameraConfig) -> Result<CameraSource> {
    let device = config.device.node();
    let mut camera = CameraSource::new(config).map_err(|e| {
        ConfigError::Invalid(format!("camera {} cannot be opened: {}", device, e))
    })?;
    // A camera that is missing at startup is retried on every capture.
    if let Err(err) = camera.connect() {
        log::warn!("{}; will retry on capture", err);
    }
    Ok(camera)
}

/// Sleep for `interval`, waking early on cancellation. Returns true if cancelled.
fn pause(interval: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    let tick = Duration::from_millis(50);
    loop {
        if cancel.load(Ordering::SeqCst) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(tick.min(deadline - now));
    }
}
