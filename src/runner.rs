//! Job execution: one [`JobPlan`] through one pixel pipeline.
//!
//! Every job walks the same state machine:
//!
//! ```text
//! Queued ──permit──► Admitted ──► Running ──► Completed
//!    │                               │
//!    └──no permit──► Failed ◄────────┘
//! ```
//!
//! Admission is decided when the job is submitted, on the caller's thread,
//! so a rejected request fails fast and is never queued. Admitted jobs run to
//! completion; there is no cancellation.
//!
//! The pipeline steps run in a fixed order:
//!
//! 1. decode the outer area, subsampled while decoding when shrinking
//! 2. scale by the residual factor
//! 3. rotate (then crop to the inner area with whole-rotation coverage)
//! 4. mirror
//! 5. contrast and brightness
//! 6. per-channel color adjustment
//! 7. color operation
//! 8. encode
//!
//! [`ExecutionMode::Sync`] runs the job on the submitting thread.
//! [`ExecutionMode::Async`] hands it to the rayon worker pool; the result
//! comes back through a [`JobHandle`], which can be waited on or awaited.

use crate::admission::{AdmissionController, JobPermit};
use crate::error::ScalerError;
use crate::geometry::{ImageSize, PixelRect};
use crate::imaging::calculations::{
    color_multipliers, contrast_multiplier, rotate_offset, subsample_stride,
};
use crate::imaging::{ImageBackend, PixelPipeline};
use crate::planner::JobPlan;
use log::{debug, error, info, warn};
use std::any::Any;
use std::future::Future;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;

/// Mirror axis angles for `hmir` and `vmir`.
const HORIZONTAL_AXIS: f64 = 0.0;
const VERTICAL_AXIS: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Admitted,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run on the submitting thread.
    Sync,
    /// Run on a worker thread.
    Async,
}

/// Encoded output of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

type JobResult = Result<RenderedImage, ScalerError>;

/// Completion channel of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    receiver: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    fn channel() -> (oneshot::Sender<JobResult>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// Block until the job is done. Must not be called from async code.
    pub fn wait(self) -> JobResult {
        self.receiver.blocking_recv().unwrap_or_else(|_| Err(lost()))
    }
}

impl Future for JobHandle {
    type Output = JobResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(lost())))
    }
}

/// The worker dropped the sender without reporting.
fn lost() -> ScalerError {
    ScalerError::Transform("job ended without a result".into())
}

/// Run `render`, turning a panic into a job failure.
///
/// The job and its permit are dropped while unwinding, so the slot is free
/// again by the time the error is returned.
fn contained<T>(render: impl FnOnce() -> Result<T, ScalerError>) -> Result<T, ScalerError> {
    panic::catch_unwind(AssertUnwindSafe(render)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!("job panicked: {message}");
        Err(ScalerError::Transform(format!("job panicked: {message}")))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Runs admitted jobs, inline or on a worker pool.
pub struct JobRunner {
    admission: AdmissionController,
    backend: Arc<dyn ImageBackend>,
    pool: rayon::ThreadPool,
}

impl JobRunner {
    pub fn new(
        admission: AdmissionController,
        backend: Arc<dyn ImageBackend>,
        threads: usize,
    ) -> Result<Self, ScalerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("scaler-worker-{i}"))
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self {
            admission,
            backend,
            pool,
        })
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Admit and start a job.
    ///
    /// Fails with [`ScalerError::ServiceOverloaded`] when no slot is free.
    /// Pipeline errors are delivered through the handle.
    pub fn submit(&self, plan: JobPlan, mode: ExecutionMode) -> Result<JobHandle, ScalerError> {
        let job = Job::admit(plan, Arc::clone(&self.backend), &self.admission)?;
        let (sender, handle) = JobHandle::channel();
        match mode {
            ExecutionMode::Sync => {
                let _ = sender.send(contained(|| job.render()));
            }
            ExecutionMode::Async => {
                self.pool.spawn(move || {
                    if sender.send(contained(|| job.render())).is_err() {
                        debug!("job result dropped, caller went away");
                    }
                });
            }
        }
        Ok(handle)
    }

    /// Run a job on this thread, encoding straight into `sink`.
    ///
    /// Returns the MIME type written.
    pub fn render_into(&self, plan: JobPlan, sink: &mut dyn Write) -> Result<String, ScalerError> {
        let job = Job::admit(plan, Arc::clone(&self.backend), &self.admission)?;
        let mime = job.plan.output_mime.clone();
        contained(|| job.run(sink))?;
        Ok(mime)
    }
}

/// One plan bound to a permit.
struct Job {
    plan: JobPlan,
    backend: Arc<dyn ImageBackend>,
    state: JobState,
    permit: Option<JobPermit>,
}

impl Job {
    fn admit(
        plan: JobPlan,
        backend: Arc<dyn ImageBackend>,
        admission: &AdmissionController,
    ) -> Result<Self, ScalerError> {
        let mut job = Self {
            plan,
            backend,
            state: JobState::Queued,
            permit: None,
        };
        match admission.try_admit() {
            Ok(permit) => {
                job.permit = Some(permit);
                job.transition(JobState::Admitted);
                Ok(job)
            }
            Err(e) => {
                job.transition(JobState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&mut self, to: JobState) {
        debug!(
            "job {}: {:?} -> {to:?}",
            self.plan.source.path.display(),
            self.state
        );
        self.state = to;
    }

    fn render(self) -> JobResult {
        let mime = self.plan.output_mime.clone();
        let mut bytes = Vec::new();
        self.run(&mut bytes)?;
        Ok(RenderedImage { bytes, mime })
    }

    fn run(mut self, out: &mut dyn Write) -> Result<(), ScalerError> {
        self.transition(JobState::Running);
        let started = Instant::now();
        let mut pipeline = self.backend.pipeline();
        let result = execute(&self.plan, pipeline.as_mut(), out);
        drop(pipeline);
        self.permit = None;

        let path = self.plan.source.path.display().to_string();
        match &result {
            Ok(()) => {
                self.transition(JobState::Completed);
                info!(
                    "rendered {path} as {} in {:?}",
                    self.plan.output_mime,
                    started.elapsed()
                );
            }
            Err(e) => {
                self.transition(JobState::Failed);
                warn!("rendering {path} failed after {:?}: {e}", started.elapsed());
            }
        }
        result
    }
}

/// Apply `plan` to a fresh pipeline and encode into `out`.
fn execute(plan: &JobPlan, pipeline: &mut dyn PixelPipeline, out: &mut dyn Write) -> Result<(), ScalerError> {
    pipeline.set_quality(plan.quality);

    let region = plan.outer_area.enclosing_pixels().clamped_to(plan.source.size);
    let stride = if pipeline.supports_region() {
        let stride = subsample_stride(plan.scale, plan.quality, plan.min_subsample);
        pipeline.load_region(&plan.source.path, region, stride)?;
        stride
    } else {
        pipeline.load(&plan.source.path)?;
        pipeline.crop(region)?;
        1
    };
    debug!("decoded {region:?} with stride {stride}");

    let residual = plan.scale * stride as f64;
    if (residual - 1.0).abs() > f64::EPSILON {
        pipeline.scale(residual)?;
    }

    let ops = &plan.operations;
    if ops.rotation != 0.0 {
        pipeline.rotate(ops.rotation)?;
        if plan.whole_rotation {
            let target = ImageSize::new(
                (plan.inner_area.width * plan.scale).round() as u32,
                (plan.inner_area.height * plan.scale).round() as u32,
            );
            // where the inner area's center landed on the rotated canvas
            let (rx, ry) = region.center();
            let (ix, iy) = plan.inner_area.center();
            let (dx, dy) = rotate_offset(ix - rx, iy - ry, ops.rotation);
            let rotated = pipeline.size()?;
            let center = (
                rotated.width as f64 / 2.0 + dx * plan.scale,
                rotated.height as f64 / 2.0 + dy * plan.scale,
            );
            pipeline.crop(crop_around(rotated, target, center))?;
        }
    }
    if ops.mirror_horizontal {
        pipeline.mirror(HORIZONTAL_AXIS)?;
    }
    if ops.mirror_vertical {
        pipeline.mirror(VERTICAL_AXIS)?;
    }

    if ops.contrast != 0.0 || ops.brightness != 0.0 {
        pipeline.enhance(contrast_multiplier(ops.contrast), ops.brightness)?;
    }
    if ops.rgb_multiply.is_some() || ops.rgb_add.is_some() {
        pipeline.enhance_color(
            color_multipliers(ops.rgb_multiply),
            ops.rgb_add.unwrap_or([0.0; 3]),
        )?;
    }
    if let Some(op) = ops.color_op {
        pipeline.color_op(op)?;
    }

    pipeline.encode(&plan.output_mime, out)?;
    Ok(())
}

/// A `target` sized rectangle centered on `center`, shrunk and shifted to
/// stay inside `size`.
fn crop_around(size: ImageSize, target: ImageSize, center: (f64, f64)) -> PixelRect {
    let width = target.width.clamp(1, size.width.max(1));
    let height = target.height.clamp(1, size.height.max(1));
    let origin = |c: f64, extent: u32, limit: u32| {
        let max = limit.saturating_sub(extent) as f64;
        (c - extent as f64 / 2.0).round().clamp(0.0, max) as u32
    };
    PixelRect::new(
        origin(center.0, width, size.width),
        origin(center.1, height, size.height),
        width,
        height,
    )
}
