//! Request facade: parameters in, image bytes (or a file to send) out.
//!
//! [`Scaler`] ties the pieces together for a transport layer:
//!
//! 1. plan the request against the pyramid lookup
//! 2. send the source file as is when the plan says so (no admission needed)
//! 3. otherwise submit the job to the runner, which applies admission control
//!
//! Errors are logged here once and returned; a transport turns them into a
//! response with [`ScalerError::report`].

use crate::admission::AdmissionController;
use crate::config::{ScalerConfig, effective_threads};
use crate::error::ScalerError;
use crate::imaging::{ImageBackend, RustBackend};
use crate::params::ParameterMap;
use crate::planner::{PassthroughPlan, Plan, plan_job};
use crate::pyramid::{DirectoryLookup, PyramidLookup};
use crate::runner::{ExecutionMode, JobHandle, JobRunner, RenderedImage};
use log::{info, warn};
use std::io::Write;
use std::sync::Arc;

/// What a request turned into.
#[derive(Debug)]
pub enum Reply {
    /// Send this file untouched.
    File(PassthroughPlan),
    /// A submitted render job.
    Job(JobHandle),
}

impl Reply {
    /// Block until the bytes are available. Files are read into memory.
    pub fn wait(self) -> Result<RenderedImage, ScalerError> {
        match self {
            Reply::File(file) => Ok(RenderedImage {
                bytes: std::fs::read(&file.path)?,
                mime: file.mime,
            }),
            Reply::Job(handle) => handle.wait(),
        }
    }
}

pub struct Scaler {
    config: ScalerConfig,
    lookup: Arc<dyn PyramidLookup>,
    runner: JobRunner,
}

impl Scaler {
    /// A scaler with its own admission pool of `max_running_jobs` slots.
    pub fn new(
        config: ScalerConfig,
        lookup: Arc<dyn PyramidLookup>,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self, ScalerError> {
        let admission = AdmissionController::new(config.max_running_jobs);
        Self::with_admission(config, lookup, backend, admission)
    }

    /// A scaler sharing an existing admission pool.
    pub fn with_admission(
        config: ScalerConfig,
        lookup: Arc<dyn PyramidLookup>,
        backend: Arc<dyn ImageBackend>,
        admission: AdmissionController,
    ) -> Result<Self, ScalerError> {
        let threads = effective_threads(&config.workers);
        let runner = JobRunner::new(admission, backend, threads)?;
        Ok(Self {
            config,
            lookup,
            runner,
        })
    }

    /// Directory lookup over `config.base_dirs`, decoded with the image crate.
    pub fn from_config(config: ScalerConfig) -> Result<Self, ScalerError> {
        let backend: Arc<dyn ImageBackend> = Arc::new(RustBackend::new());
        let lookup = Arc::new(
            DirectoryLookup::new(config.base_dirs.clone(), Arc::clone(&backend))
                .with_cache_capacity(config.pyramid_cache_size),
        );
        Self::new(config, lookup, backend)
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        self.runner.admission()
    }

    pub fn plan(&self, params: &ParameterMap) -> Result<Plan, ScalerError> {
        plan_job(params, self.lookup.as_ref(), &self.config)
            .inspect_err(|e| warn!("planning {} failed: {e}", params.get_str("fn")))
    }

    /// Plan a request and start rendering it if needed.
    pub fn process(&self, params: &ParameterMap, mode: ExecutionMode) -> Result<Reply, ScalerError> {
        match self.plan(params)? {
            Plan::Passthrough(file) => {
                info!("sending {} as {}", file.path.display(), file.mime);
                Ok(Reply::File(file))
            }
            Plan::Render(plan) => Ok(Reply::Job(self.runner.submit(plan, mode)?)),
        }
    }

    /// Process a request synchronously, writing the response body to `sink`.
    ///
    /// Returns the MIME type of what was written.
    pub fn process_into(&self, params: &ParameterMap, sink: &mut dyn Write) -> Result<String, ScalerError> {
        match self.plan(params)? {
            Plan::Passthrough(file) => {
                info!("sending {} as {}", file.path.display(), file.mime);
                let mut source = std::fs::File::open(&file.path)?;
                std::io::copy(&mut source, sink)?;
                Ok(file.mime)
            }
            Plan::Render(plan) => self.runner.render_into(plan, sink),
        }
    }
}
