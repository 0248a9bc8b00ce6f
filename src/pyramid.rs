//! Resolution pyramids: the same image stored at several pixel sizes.
//!
//! A [`SourceAsset`] is one file of a pyramid. Its size, MIME type and
//! physical resolution are inspected on first use and cached on the asset, so a
//! pyramid kept by a [`PyramidLookup`] answers later requests without touching
//! the file headers again. Probing is idempotent: racing first touches compute
//! the same values and the first one stored wins.
//!
//! Assets that fail to inspect are skipped (with a warning) rather than failing
//! the whole pyramid; a pyramid with no readable asset behaves as empty.

use crate::geometry::ImageSize;
use crate::imaging::{ImageBackend, ImageInfo, PipelineError, Resolution, supported_input_extensions};
use log::{debug, warn};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Pyramids a [`DirectoryLookup`] keeps unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// One stored resolution of an image.
#[derive(Debug)]
pub struct SourceAsset {
    path: PathBuf,
    info: OnceLock<ImageInfo>,
    resolution: OnceLock<Option<Resolution>>,
}

impl SourceAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            info: OnceLock::new(),
            resolution: OnceLock::new(),
        }
    }

    /// An asset whose size and type are already known.
    pub fn with_info(path: impl Into<PathBuf>, info: ImageInfo) -> Self {
        let asset = Self::new(path);
        let _ = asset.info.set(info);
        asset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size and MIME type, inspected on first call.
    pub fn info(&self, backend: &dyn ImageBackend) -> Result<&ImageInfo, PipelineError> {
        if let Some(info) = self.info.get() {
            return Ok(info);
        }
        let inspected = backend.inspect(&self.path)?;
        debug!("inspected {}: {} {}", self.path.display(), inspected.size, inspected.mime);
        Ok(self.info.get_or_init(|| inspected))
    }

    pub fn size(&self, backend: &dyn ImageBackend) -> Result<ImageSize, PipelineError> {
        Ok(self.info(backend)?.size)
    }

    /// MIME type, `None` when the file cannot be identified.
    pub fn mime_type(&self, backend: &dyn ImageBackend) -> Option<&str> {
        self.info(backend).ok().map(|i| i.mime.as_str())
    }

    /// Physical resolution from the file header, read on first call.
    pub fn resolution(&self, backend: &dyn ImageBackend) -> Option<Resolution> {
        *self
            .resolution
            .get_or_init(|| backend.read_resolution(&self.path))
    }
}

/// Same-content images at different sizes.
pub struct Pyramid {
    assets: Vec<SourceAsset>,
    backend: Arc<dyn ImageBackend>,
}

impl std::fmt::Debug for Pyramid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pyramid").field("assets", &self.assets).finish()
    }
}

impl Pyramid {
    pub fn new(assets: Vec<SourceAsset>, backend: Arc<dyn ImageBackend>) -> Self {
        Self { assets, backend }
    }

    pub fn backend(&self) -> &dyn ImageBackend {
        self.backend.as_ref()
    }

    pub fn assets(&self) -> &[SourceAsset] {
        &self.assets
    }

    pub fn is_empty(&self) -> bool {
        self.ranked().is_empty()
    }

    /// Readable assets, smallest first.
    fn ranked(&self) -> Vec<(&SourceAsset, ImageSize)> {
        let mut ranked: Vec<_> = self
            .assets
            .iter()
            .filter_map(|asset| match asset.size(self.backend()) {
                Ok(size) => Some((asset, size)),
                Err(e) => {
                    warn!("skipping {}: {e}", asset.path().display());
                    None
                }
            })
            .collect();
        ranked.sort_by_key(|(_, size)| (size.width, size.height));
        ranked
    }

    pub fn biggest(&self) -> Option<&SourceAsset> {
        self.ranked().last().map(|(a, _)| *a)
    }

    pub fn smallest(&self) -> Option<&SourceAsset> {
        self.ranked().first().map(|(a, _)| *a)
    }

    /// Smallest asset that `size` fits into.
    pub fn next_bigger_than(&self, size: ImageSize) -> Option<&SourceAsset> {
        self.ranked()
            .into_iter()
            .find(|(_, s)| size.fits_in(*s))
            .map(|(a, _)| a)
    }

    /// Biggest asset that fits into `size`.
    pub fn next_smaller_than(&self, size: ImageSize) -> Option<&SourceAsset> {
        self.ranked()
            .into_iter()
            .rev()
            .find(|(_, s)| s.fits_in(size))
            .map(|(a, _)| a)
    }

    /// Resolution of the biggest asset.
    ///
    /// When only a smaller asset records one, it is scaled up by the width
    /// ratio, since all assets show the same physical extent.
    pub fn resolution(&self) -> Option<Resolution> {
        let ranked = self.ranked();
        let (_, hires) = *ranked.last()?;
        ranked.iter().rev().find_map(|(asset, size)| {
            let res = asset.resolution(self.backend())?;
            if size.width == 0 || size.height == 0 {
                return None;
            }
            Some(Resolution {
                x: res.x * hires.width as f64 / size.width as f64,
                y: res.y * hires.height as f64 / size.height as f64,
            })
        })
    }
}

/// Maps a request path and page number to a pyramid.
pub trait PyramidLookup: Send + Sync {
    fn find(&self, path: &str, page: u32) -> Option<Arc<Pyramid>>;
}

/// Pyramids stored as parallel directory trees, one per resolution.
///
/// `images/books/p001.tif`, `images-lores/books/p001.jpg` and so on are the
/// same picture. Files are matched by path with or without extension, so each
/// tree may use its own format. When the request path names a directory, the
/// `page`-th image file in name order is used.
///
/// Found pyramids, with their inspected metadata, are kept in a bounded LRU
/// cache. Files changed on disk are picked up once their entry is evicted.
pub struct DirectoryLookup {
    base_dirs: Vec<PathBuf>,
    backend: Arc<dyn ImageBackend>,
    cache: Mutex<LruCache<(String, u32), Arc<Pyramid>>>,
}

impl DirectoryLookup {
    pub fn new(base_dirs: Vec<PathBuf>, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            base_dirs,
            backend,
            cache: Mutex::new(LruCache::new(capacity(DEFAULT_CACHE_CAPACITY))),
        }
    }

    /// Keep at most `pyramids` entries (at least one).
    pub fn with_cache_capacity(mut self, pyramids: usize) -> Self {
        self.cache = Mutex::new(LruCache::new(capacity(pyramids)));
        self
    }

    /// Relative file path of the requested image, resolving directories to pages.
    fn resolve_file(&self, path: &str, page: u32) -> Option<PathBuf> {
        for base in &self.base_dirs {
            let candidate = base.join(path);
            if candidate.is_dir() {
                let files = image_files(&candidate);
                let index = page.max(1) as usize - 1;
                return files.get(index).map(|name| Path::new(path).join(name));
            }
            if candidate.is_file() || find_by_stem(&candidate).is_some() {
                return Some(PathBuf::from(path));
            }
        }
        None
    }

    fn build(&self, path: &str, page: u32) -> Option<Pyramid> {
        let relative = self.resolve_file(path, page)?;
        let assets: Vec<SourceAsset> = self
            .base_dirs
            .iter()
            .filter_map(|base| {
                let candidate = base.join(&relative);
                if candidate.is_file() {
                    Some(candidate)
                } else {
                    find_by_stem(&candidate)
                }
            })
            .map(SourceAsset::new)
            .collect();
        if assets.is_empty() {
            return None;
        }
        debug!("pyramid for {path} page {page}: {} assets", assets.len());
        Some(Pyramid::new(assets, Arc::clone(&self.backend)))
    }
}

impl PyramidLookup for DirectoryLookup {
    fn find(&self, path: &str, page: u32) -> Option<Arc<Pyramid>> {
        let key = (path.to_string(), page);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(found) = cache.get(&key) {
                return Some(Arc::clone(found));
            }
        }
        // built outside the lock; a racing build of the same key is harmless
        let pyramid = Arc::new(self.build(path, page)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, Arc::clone(&pyramid));
        }
        Some(pyramid)
    }
}

fn capacity(pyramids: usize) -> NonZeroUsize {
    NonZeroUsize::new(pyramids).unwrap_or(NonZeroUsize::MIN)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
}

/// Image file names in `dir`, sorted.
fn image_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_image_extension(p))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

/// An image file next to `candidate` with the same stem and any image extension.
fn find_by_stem(candidate: &Path) -> Option<PathBuf> {
    let dir = candidate.parent()?;
    let stem = candidate.file_stem()?.to_str()?;
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && has_image_extension(p)
                && p.file_stem().and_then(|s| s.to_str()) == Some(stem)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::{mock_pyramid, write_jpeg, write_png};
    use crate::imaging::RustBackend;

    // =========================================================================
    // Selection
    // =========================================================================

    #[test]
    fn biggest_and_smallest() {
        let (_, pyramid) = mock_pyramid(&[(1000, 750), (500, 375), (2000, 1500)]);
        assert!(pyramid.biggest().unwrap().path().ends_with("2000.jpg"));
        assert!(pyramid.smallest().unwrap().path().ends_with("500.jpg"));
    }

    #[test]
    fn next_bigger_is_smallest_that_contains() {
        let (_, pyramid) = mock_pyramid(&[(500, 375), (1000, 750), (2000, 1500)]);
        let asset = pyramid.next_bigger_than(ImageSize::new(800, 600)).unwrap();
        assert!(asset.path().ends_with("1000.jpg"));
        // exact fit counts
        let asset = pyramid.next_bigger_than(ImageSize::new(500, 375)).unwrap();
        assert!(asset.path().ends_with("500.jpg"));
        assert!(pyramid.next_bigger_than(ImageSize::new(3000, 10)).is_none());
    }

    #[test]
    fn next_smaller_is_biggest_that_fits() {
        let (_, pyramid) = mock_pyramid(&[(500, 375), (1000, 750), (2000, 1500)]);
        let asset = pyramid.next_smaller_than(ImageSize::new(800, 600)).unwrap();
        assert!(asset.path().ends_with("500.jpg"));
        assert!(pyramid.next_smaller_than(ImageSize::new(100, 100)).is_none());
    }

    #[test]
    fn probing_is_cached_on_the_asset() {
        let (backend, pyramid) = mock_pyramid(&[(500, 375), (1000, 750)]);
        pyramid.biggest();
        pyramid.smallest();
        pyramid.next_bigger_than(ImageSize::new(10, 10));
        assert_eq!(backend.get_inspected().len(), 2);
    }

    #[test]
    fn unreadable_assets_are_skipped() {
        let backend = Arc::new(MockBackend::new().with_image("/p/500.jpg", 500, 375, "image/jpeg"));
        let pyramid = Pyramid::new(
            vec![SourceAsset::new("/p/missing.jpg"), SourceAsset::new("/p/500.jpg")],
            backend,
        );
        assert!(pyramid.biggest().unwrap().path().ends_with("500.jpg"));
        assert!(!pyramid.is_empty());
    }

    #[test]
    fn empty_pyramid() {
        let pyramid = Pyramid::new(vec![], Arc::new(MockBackend::new()));
        assert!(pyramid.is_empty());
        assert!(pyramid.biggest().is_none());
        assert!(pyramid.resolution().is_none());
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    #[test]
    fn resolution_from_biggest_asset() {
        let backend = Arc::new(
            MockBackend::new()
                .with_image("/p/a.jpg", 2000, 1000, "image/jpeg")
                .with_image("/p/b.jpg", 1000, 500, "image/jpeg")
                .with_resolution("/p/a.jpg", 600.0)
                .with_resolution("/p/b.jpg", 300.0),
        );
        let pyramid = Pyramid::new(
            vec![SourceAsset::new("/p/b.jpg"), SourceAsset::new("/p/a.jpg")],
            backend,
        );
        assert_eq!(pyramid.resolution(), Some(Resolution { x: 600.0, y: 600.0 }));
    }

    #[test]
    fn resolution_scaled_from_smaller_asset() {
        let backend = Arc::new(
            MockBackend::new()
                .with_image("/p/a.jpg", 2000, 1000, "image/jpeg")
                .with_image("/p/b.jpg", 1000, 500, "image/jpeg")
                .with_resolution("/p/b.jpg", 150.0),
        );
        let pyramid = Pyramid::new(
            vec![SourceAsset::new("/p/a.jpg"), SourceAsset::new("/p/b.jpg")],
            backend,
        );
        assert_eq!(pyramid.resolution(), Some(Resolution { x: 300.0, y: 300.0 }));
    }

    // =========================================================================
    // DirectoryLookup
    // =========================================================================

    #[test]
    fn directory_lookup_collects_all_resolutions() {
        let tmp = tempfile::TempDir::new().unwrap();
        let hires = tmp.path().join("hires");
        let lores = tmp.path().join("lores");
        write_png(&hires.join("book/p1.png"), 400, 300);
        write_jpeg(&lores.join("book/p1.jpg"), 100, 75);

        let lookup = DirectoryLookup::new(vec![hires, lores], Arc::new(RustBackend::new()));
        let pyramid = lookup.find("book/p1.png", 1).unwrap();
        assert_eq!(pyramid.assets().len(), 2);
        let biggest = pyramid.biggest().unwrap();
        assert_eq!(
            biggest.size(pyramid.backend()).unwrap(),
            ImageSize::new(400, 300)
        );
        assert_eq!(biggest.mime_type(pyramid.backend()), Some("image/png"));
    }

    #[test]
    fn directory_lookup_pages_through_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().join("images");
        write_jpeg(&base.join("book/002.jpg"), 20, 10);
        write_jpeg(&base.join("book/001.jpg"), 10, 10);
        std::fs::write(base.join("book/notes.txt"), "not an image").unwrap();

        let lookup = DirectoryLookup::new(vec![base], Arc::new(RustBackend::new()));
        let first = lookup.find("book", 1).unwrap();
        assert!(first.assets()[0].path().ends_with("book/001.jpg"));
        let second = lookup.find("book", 2).unwrap();
        assert!(second.assets()[0].path().ends_with("book/002.jpg"));
        assert!(lookup.find("book", 3).is_none());
    }

    #[test]
    fn directory_lookup_matches_by_stem() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().join("images");
        write_jpeg(&base.join("p1.jpg"), 10, 10);

        let lookup = DirectoryLookup::new(vec![base], Arc::new(RustBackend::new()));
        let pyramid = lookup.find("p1", 1).unwrap();
        assert!(pyramid.assets()[0].path().ends_with("p1.jpg"));
    }

    #[test]
    fn directory_lookup_caches_pyramids() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().join("images");
        write_jpeg(&base.join("p1.jpg"), 10, 10);

        let lookup = DirectoryLookup::new(vec![base], Arc::new(RustBackend::new()));
        let a = lookup.find("p1.jpg", 1).unwrap();
        let b = lookup.find("p1.jpg", 1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn directory_lookup_cache_is_bounded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().join("images");
        write_jpeg(&base.join("p1.jpg"), 10, 10);
        write_jpeg(&base.join("p2.jpg"), 10, 10);

        let lookup =
            DirectoryLookup::new(vec![base], Arc::new(RustBackend::new())).with_cache_capacity(1);
        let first = lookup.find("p1.jpg", 1).unwrap();
        assert!(Arc::ptr_eq(&first, &lookup.find("p1.jpg", 1).unwrap()));

        // p2 pushes p1 out, so p1 is built afresh
        lookup.find("p2.jpg", 1).unwrap();
        assert!(!Arc::ptr_eq(&first, &lookup.find("p1.jpg", 1).unwrap()));
    }

    #[test]
    fn directory_lookup_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let lookup = DirectoryLookup::new(vec![tmp.path().to_path_buf()], Arc::new(RustBackend::new()));
        assert!(lookup.find("nope.jpg", 1).is_none());
    }
}
