//! Pixel work: probing, decoding, transforming and encoding rasters.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Inspect** | `image::ImageReader::into_dimensions` |
//! | **Resolution** | JFIF and PNG `pHYs` headers, `kamadak-exif` for EXIF/TIFF |
//! | **Region decode** | `jpeg-decoder` DCT scaling for JPEG, `image` decoders otherwise, then a strided copy |
//! | **Scale / rotate / mirror** | `image::DynamicImage` + inverse-mapped rotation |
//! | **Encode** | JPEG and PNG encoders |
//!
//! The module is split into:
//! - **Calculations**: pure functions for rotation, mirror and subsample math (unit testable)
//! - **Parameters**: quality levels and color operations
//! - **Backend**: [`ImageBackend`] / [`PixelPipeline`] traits + [`RustBackend`]
//! - **Dpi**: physical resolution from file headers

pub mod backend;
pub mod calculations;
pub(crate) mod dpi;
mod params;
pub mod rust_backend;

pub use backend::{ChannelOrder, ImageBackend, ImageInfo, PipelineError, PixelPipeline, Resolution};
pub use params::{ColorOp, Interpolation, ScaleQuality};
pub use rust_backend::{RustBackend, supported_input_extensions};
