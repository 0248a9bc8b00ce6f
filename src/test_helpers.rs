//! Shared test utilities for the pyramid-scaler test suite.
//!
//! Provides synthetic image files, mock-backed pyramids and an in-memory
//! pyramid lookup, so planner and runner tests can describe a pyramid as a
//! list of sizes.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (backend, pyramid) = mock_pyramid(&[(500, 375), (1000, 750), (2000, 1500)]);
//! let lookup = MemoryLookup::new().with("book/p1", pyramid);
//!
//! let params = ParameterMap::from_query("fn=book/p1&dw=800");
//! let plan = plan_job(&params, &lookup, &ScalerConfig::default()).unwrap();
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, RgbImage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::imaging::backend::tests::MockBackend;
use crate::pyramid::{Pyramid, PyramidLookup, SourceAsset};

// =========================================================================
// Synthetic files
// =========================================================================

/// A gradient so resampling and rotation change pixel values.
fn pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

/// Write a baseline JPEG of the given size, creating parent directories.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = pattern(width, height);
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write an RGB PNG of the given size, creating parent directories.
pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    pattern(width, height).save(path).unwrap();
}

// =========================================================================
// Mock pyramids
// =========================================================================

/// Path of the mock JPEG asset with the given width.
pub fn mock_path(width: u32) -> String {
    format!("/p/{width}.jpg")
}

/// A pyramid of mock JPEG assets, one per `(width, height)`.
///
/// Assets live at `/p/{width}.jpg`. The backend is returned too so tests can
/// inspect asset reads and recorded pipeline operations.
pub fn mock_pyramid(sizes: &[(u32, u32)]) -> (Arc<MockBackend>, Pyramid) {
    let backend = sizes
        .iter()
        .fold(MockBackend::new(), |b, &(w, h)| {
            b.with_image(mock_path(w), w, h, "image/jpeg")
        });
    mock_pyramid_on(Arc::new(backend), sizes)
}

/// Like [`mock_pyramid`] but on a prepared backend (resolutions, gates).
pub fn mock_pyramid_on(backend: Arc<MockBackend>, sizes: &[(u32, u32)]) -> (Arc<MockBackend>, Pyramid) {
    let assets = sizes
        .iter()
        .map(|&(w, _)| SourceAsset::new(mock_path(w)))
        .collect();
    let pyramid = Pyramid::new(assets, backend.clone());
    (backend, pyramid)
}

// =========================================================================
// In-memory lookup
// =========================================================================

/// Lookup over a fixed set of pyramids. The page number is ignored.
#[derive(Default)]
pub struct MemoryLookup {
    pyramids: HashMap<String, Arc<Pyramid>>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, pyramid: Pyramid) -> Self {
        self.pyramids.insert(path.to_string(), Arc::new(pyramid));
        self
    }
}

impl PyramidLookup for MemoryLookup {
    fn find(&self, path: &str, _page: u32) -> Option<Arc<Pyramid>> {
        self.pyramids.get(path).cloned()
    }
}
