//! # Pyramid Scaler
//!
//! Serves scaled, cropped, rotated and color-adjusted views of images stored
//! as resolution pyramids: the same picture kept at several pixel sizes. Each
//! request reads the cheapest stored size that still gives the requested
//! fidelity, and pixel work is bounded by a process-wide job limit.
//!
//! # Architecture: Plan, Admit, Render
//!
//! ```text
//! 1. Plan     parameters + pyramid  →  JobPlan       (pure geometry, no pixels)
//! 2. Admit    JobPlan               →  permit        (fast fail when saturated)
//! 3. Render   JobPlan + pipeline    →  bytes         (decode → scale → rotate → enhance → encode)
//! ```
//!
//! Planning never touches pixel data; it only inspects file headers, and those
//! results are cached on the pyramid. A request that needs no transformation
//! is answered with the source file and never reaches admission.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`params`] | Typed parameter bag, query-string parsing, mode flags resolved into enums |
//! | [`geometry`] | `ImageSize`, `Rect`, `PixelRect` and the projections between coordinate spaces |
//! | [`pyramid`] | Source assets with lazily inspected metadata, pyramid selection, directory lookup |
//! | [`planner`] | Memoized job planner producing an immutable `JobPlan` |
//! | [`admission`] | Counting semaphore bounding concurrent jobs |
//! | [`runner`] | Job state machine, sync and async execution, completion handles |
//! | [`scaler`] | Request facade used by transports and the CLI |
//! | [`imaging`] | Backend traits, `image`-crate pipeline, DPI reader, raster math |
//! | [`config`] | `scaler.toml` loading, validation, merging |
//! | [`error`] | Error taxonomy and HTTP status mapping |
//!
//! # Design Decisions
//!
//! ## Modes Resolved Once
//!
//! The `mo` parameter is a bag of string flags. They are turned into closed
//! enums ([`params::Modes`]) when the request is ingested; the planner and the
//! runner match on enums and never test option strings.
//!
//! ## Uniform Scale Only
//!
//! Scale-to-fit computes a factor per axis and keeps the smaller one, so the
//! requested window always fits the destination box. Non-uniform stretching
//! is not supported.
//!
//! ## Fast-Fail Admission
//!
//! When every job slot is busy a request fails immediately with a 503-style
//! error instead of waiting. Timeouts and retries belong to the transport.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, resampling and encoding use the `image` crate only. Arbitrary
//! rotation is an inverse-mapped bilinear resample written against
//! `image::ImageBuffer`; physical resolution is read from JFIF, EXIF, PNG and
//! TIFF headers without extra dependencies.

pub mod admission;
pub mod config;
pub mod error;
pub mod geometry;
pub mod imaging;
pub mod params;
pub mod planner;
pub mod pyramid;
pub mod runner;
pub mod scaler;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::ScalerError;
pub use params::ParameterMap;
pub use scaler::{Reply, Scaler};
