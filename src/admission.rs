//! Process-wide bound on concurrently running pixel jobs.
//!
//! The controller is a counting semaphore that never waits: a job either
//! gets a permit immediately or is rejected with
//! [`ScalerError::ServiceOverloaded`]. Permits are RAII guards, so a job
//! releases its slot on every exit path, success, failure or panic.
//!
//! One controller is created per service and handed to every submission path
//! by cloning; clones share the same pool.

use crate::error::ScalerError;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// Proof of admission. Dropping it frees the slot.
#[derive(Debug)]
pub struct JobPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot if one is free.
    pub fn try_admit(&self) -> Result<JobPermit, ScalerError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                debug!("admitted job, {} slots left", self.available());
                Ok(JobPermit { _permit: permit })
            }
            Err(_) => {
                warn!("rejecting job: all {} slots busy", self.capacity);
                Err(ScalerError::ServiceOverloaded {
                    capacity: self.capacity,
                })
            }
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Jobs currently holding a permit.
    pub fn running(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
