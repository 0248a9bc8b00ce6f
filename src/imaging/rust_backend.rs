//! Pure Rust pixel backend on top of the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Inspect (size, MIME) | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image` crate decoders |
//! | Region + subsample (JPEG) | `jpeg_decoder::Decoder::scale` (DCT 1/2, 1/4, 1/8), then a strided copy |
//! | Region + subsample (other) | full decode, then one strided copy of the region |
//! | Scale | `DynamicImage::resize_exact` (`Nearest` at q0, `Triangle` above) |
//! | Rotate 90/180/270 | `DynamicImage::rotate90` / `rotate180` / `rotate270` |
//! | Rotate other angles | inverse mapping onto an expanded canvas |
//! | Mirror | `DynamicImage::fliph` / `flipv` |
//! | Encode | `JpegEncoder` / `PngEncoder` |
//! | Resolution | `dpi` reader: JFIF and pHYs headers, `kamadak-exif` for EXIF/TIFF |
//!
//! Decoded buffers are normalized to 8-bit luma, luma+alpha, RGB or RGBA so
//! every operation handles exactly those four layouts.

use super::backend::{ImageBackend, ImageInfo, PipelineError, PixelPipeline, Resolution};
use super::calculations::{Flip, mirror_flip, quarter_turns, rgb_ordered, rotated_canvas};
use super::params::{ColorOp, Interpolation, ScaleQuality};
use crate::geometry::{ImageSize, PixelRect};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, ImageReader, Pixel};
use jpeg_decoder::PixelFormat;
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::LazyLock;

/// JPEG quality used for rendered output.
const JPEG_QUALITY: u8 = 90;

/// Denominators of the DCT scalings the JPEG decoder supports, largest first.
const JPEG_DCT_SCALES: [u32; 3] = [8, 4, 2];

const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("gif", ImageFormat::Gif),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

pub fn mime_for_format(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBackend for RustBackend {
    fn inspect(&self, path: &Path) -> Result<ImageInfo, PipelineError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format().ok_or_else(|| {
            PipelineError::UnsupportedFormat(format!("unknown image type: {}", path.display()))
        })?;
        let mime = mime_for_format(format).ok_or_else(|| {
            PipelineError::UnsupportedFormat(format!("{format:?}: {}", path.display()))
        })?;
        let (width, height) = reader.into_dimensions().map_err(|e| {
            PipelineError::Decode(format!("Failed to read dimensions of {}: {e}", path.display()))
        })?;
        Ok(ImageInfo {
            size: ImageSize::new(width, height),
            mime: mime.to_string(),
        })
    }

    fn read_resolution(&self, path: &Path) -> Option<Resolution> {
        super::dpi::read_resolution(path)
    }

    fn pipeline(&self) -> Box<dyn PixelPipeline> {
        Box::new(RustPipeline::new())
    }
}

/// One decoded raster.
pub struct RustPipeline {
    image: Option<DynamicImage>,
    interpolation: Interpolation,
}

impl RustPipeline {
    pub fn new() -> Self {
        Self {
            image: None,
            interpolation: ScaleQuality::default().interpolation(),
        }
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image: Some(normalize(image)),
            ..Self::new()
        }
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    fn loaded(&self) -> Result<&DynamicImage, PipelineError> {
        self.image.as_ref().ok_or(PipelineError::NotLoaded)
    }

    fn loaded_mut(&mut self) -> Result<&mut DynamicImage, PipelineError> {
        self.image.as_mut().ok_or(PipelineError::NotLoaded)
    }
}

impl Default for RustPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
fn decode_file(path: &Path) -> Result<DynamicImage, PipelineError> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| PipelineError::Decode(format!("{}: {e}", path.display())))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(PipelineError::Decode(format!(
            "{}: image has no pixels",
            path.display()
        )));
    }
    Ok(normalize(img))
}

/// Convert any decoded layout to its 8-bit counterpart.
fn normalize(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img,
        other => {
            let color = other.color();
            match (color.has_color(), color.has_alpha()) {
                (false, false) => DynamicImage::ImageLuma8(other.into_luma8()),
                (false, true) => DynamicImage::ImageLumaA8(other.into_luma_alpha8()),
                (true, false) => DynamicImage::ImageRgb8(other.into_rgb8()),
                (true, true) => DynamicImage::ImageRgba8(other.into_rgba8()),
            }
        }
    }
}

/// Raw bytes of a normalized buffer with `(channels, color channels)`.
fn raw_mut(img: &mut DynamicImage) -> Option<(&mut [u8], usize, usize)> {
    match img {
        DynamicImage::ImageLuma8(b) => Some((&mut **b, 1, 1)),
        DynamicImage::ImageLumaA8(b) => Some((&mut **b, 2, 1)),
        DynamicImage::ImageRgb8(b) => Some((&mut **b, 3, 3)),
        DynamicImage::ImageRgba8(b) => Some((&mut **b, 4, 3)),
        _ => None,
    }
}

type Buffer<P> = ImageBuffer<P, Vec<u8>>;

/// Which pixels of a decoded buffer make up the loaded region.
#[derive(Debug, Clone, Copy)]
struct Sampling {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    step: u32,
}

impl Sampling {
    /// Every `stride`-th pixel of `region`, read from a buffer decoded at
    /// `1/denom` of the source size.
    fn new(region: PixelRect, stride: u32, denom: u32) -> Self {
        Self {
            x: region.x / denom,
            y: region.y / denom,
            width: region.width.div_ceil(stride),
            height: region.height.div_ceil(stride),
            step: stride / denom,
        }
    }
}

/// Copy the sampled pixels; positions past the buffer edge repeat the last
/// row or column.
fn strided_copy<P: Pixel<Subpixel = u8>>(src: &Buffer<P>, s: Sampling) -> Buffer<P> {
    let max_x = src.width().saturating_sub(1);
    let max_y = src.height().saturating_sub(1);
    ImageBuffer::from_fn(s.width, s.height, |x, y| {
        *src.get_pixel((s.x + x * s.step).min(max_x), (s.y + y * s.step).min(max_y))
    })
}

fn subsample_region(img: &DynamicImage, sampling: Sampling) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(b) => DynamicImage::ImageLuma8(strided_copy(b, sampling)),
        DynamicImage::ImageLumaA8(b) => DynamicImage::ImageLumaA8(strided_copy(b, sampling)),
        DynamicImage::ImageRgb8(b) => DynamicImage::ImageRgb8(strided_copy(b, sampling)),
        other => DynamicImage::ImageRgba8(strided_copy(&other.to_rgba8(), sampling)),
    }
}

/// A JPEG decoded at a fraction of its size.
struct ReducedJpeg {
    image: DynamicImage,
    /// Scale denominator: the buffer is `1/denom` of `full`.
    denom: u32,
    full: ImageSize,
}

/// Decode a JPEG at 1/2, 1/4 or 1/8 of its size, picking the largest
/// reduction that divides `stride`.
///
/// `None` when the file is not a JPEG, no reduction divides `stride`, or the
/// decoder yields a layout other than 8-bit gray or RGB; the caller then
/// decodes at full size.
fn decode_jpeg_reduced(path: &Path, stride: u32) -> Result<Option<ReducedJpeg>, PipelineError> {
    let Some(denom) = JPEG_DCT_SCALES.into_iter().find(|d| stride % d == 0) else {
        return Ok(None);
    };
    let mut reader = BufReader::new(File::open(path)?);
    if !reader.fill_buf()?.starts_with(&[0xFF, 0xD8]) {
        return Ok(None);
    }

    let decode_err =
        |e: jpeg_decoder::Error| PipelineError::Decode(format!("{}: {e}", path.display()));
    let mut decoder = jpeg_decoder::Decoder::new(reader);
    decoder.read_info().map_err(decode_err)?;
    let Some(info) = decoder.info() else {
        return Ok(None);
    };
    let full = ImageSize::new(info.width as u32, info.height as u32);
    let requested = (
        full.width.div_ceil(denom) as u16,
        full.height.div_ceil(denom) as u16,
    );
    if decoder.scale(requested.0, requested.1).map_err(decode_err)? != requested {
        return Ok(None);
    }
    let pixels = decoder.decode().map_err(decode_err)?;

    let (w, h) = (requested.0 as u32, requested.1 as u32);
    let image = match info.pixel_format {
        PixelFormat::L8 => image::GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        PixelFormat::RGB24 => image::RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        _ => None,
    };
    Ok(image.map(|image| ReducedJpeg { image, denom, full }))
}

fn check_region(region: PixelRect, size: ImageSize) -> Result<(), PipelineError> {
    if region.is_within(size) {
        Ok(())
    } else {
        Err(PipelineError::InvalidGeometry(format!(
            "region {}x{}+{}+{} outside {size}",
            region.width, region.height, region.x, region.y
        )))
    }
}

/// Rotate clockwise about the center by inverse mapping.
///
/// Destination pixels whose source falls outside the image stay zero (black,
/// transparent where there is alpha).
fn rotate_buffer<P: Pixel<Subpixel = u8>>(
    src: &Buffer<P>,
    degrees: f64,
    interpolation: Interpolation,
) -> Buffer<P> {
    let (w, h) = src.dimensions();
    let (dw, dh) = rotated_canvas(ImageSize::new(w, h), degrees);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (scx, scy) = (w as f64 / 2.0, h as f64 / 2.0);
    let (dcx, dcy) = (dw as f64 / 2.0, dh as f64 / 2.0);
    let (max_x, max_y) = (w as f64 - 0.5, h as f64 - 0.5);
    let channels = P::CHANNEL_COUNT as usize;

    let mut out: Buffer<P> = ImageBuffer::new(dw, dh);
    for (x, y, px) in out.enumerate_pixels_mut() {
        // pixel centers relative to the canvas center
        let dx = x as f64 + 0.5 - dcx;
        let dy = y as f64 + 0.5 - dcy;
        let sx = dx * cos + dy * sin + scx - 0.5;
        let sy = -dx * sin + dy * cos + scy - 0.5;
        if sx < -0.5 || sy < -0.5 || sx > max_x || sy > max_y {
            continue;
        }

        let dst = px.channels_mut();
        match interpolation {
            Interpolation::Nearest => {
                let nx = (sx.round().max(0.0) as u32).min(w - 1);
                let ny = (sy.round().max(0.0) as u32).min(h - 1);
                dst.copy_from_slice(src.get_pixel(nx, ny).channels());
            }
            Interpolation::Bilinear => {
                let cx = sx.clamp(0.0, (w - 1) as f64);
                let cy = sy.clamp(0.0, (h - 1) as f64);
                let (x0, y0) = (cx.floor() as u32, cy.floor() as u32);
                let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
                let (fx, fy) = (cx - x0 as f64, cy - y0 as f64);
                let p00 = src.get_pixel(x0, y0).channels();
                let p10 = src.get_pixel(x1, y0).channels();
                let p01 = src.get_pixel(x0, y1).channels();
                let p11 = src.get_pixel(x1, y1).channels();
                for c in 0..channels {
                    let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
                    let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
                    dst[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    out
}

fn rotate_any(img: &DynamicImage, degrees: f64, interpolation: Interpolation) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(b) => {
            DynamicImage::ImageLuma8(rotate_buffer(b, degrees, interpolation))
        }
        DynamicImage::ImageLumaA8(b) => {
            DynamicImage::ImageLumaA8(rotate_buffer(b, degrees, interpolation))
        }
        DynamicImage::ImageRgb8(b) => {
            DynamicImage::ImageRgb8(rotate_buffer(b, degrees, interpolation))
        }
        other => DynamicImage::ImageRgba8(rotate_buffer(&other.to_rgba8(), degrees, interpolation)),
    }
}

/// `out = in * mult[c] + add[c]` on the color channels, alpha untouched.
fn affine(data: &mut [u8], channels: usize, color: usize, mult: &[f32], add: &[f32]) {
    for px in data.chunks_exact_mut(channels) {
        for c in 0..color {
            px[c] = (px[c] as f32 * mult[c] + add[c]).round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl PixelPipeline for RustPipeline {
    fn set_quality(&mut self, quality: ScaleQuality) {
        self.interpolation = quality.interpolation();
    }

    fn supports_region(&self) -> bool {
        true
    }

    fn load(&mut self, path: &Path) -> Result<(), PipelineError> {
        self.image = Some(decode_file(path)?);
        Ok(())
    }

    fn load_region(
        &mut self,
        path: &Path,
        region: PixelRect,
        subsample: u32,
    ) -> Result<(), PipelineError> {
        let stride = subsample.max(1);
        if stride > 1 {
            if let Some(reduced) = decode_jpeg_reduced(path, stride)? {
                check_region(region, reduced.full)?;
                debug!(
                    "decoded {} at 1/{} for stride {stride}",
                    path.display(),
                    reduced.denom
                );
                let sampling = Sampling::new(region, stride, reduced.denom);
                self.image = Some(subsample_region(&reduced.image, sampling));
                return Ok(());
            }
        }

        let full = decode_file(path)?;
        check_region(region, ImageSize::new(full.width(), full.height()))?;
        self.image = Some(subsample_region(&full, Sampling::new(region, stride, 1)));
        Ok(())
    }

    fn size(&self) -> Result<ImageSize, PipelineError> {
        let img = self.loaded()?;
        Ok(ImageSize::new(img.width(), img.height()))
    }

    fn crop(&mut self, region: PixelRect) -> Result<(), PipelineError> {
        let size = self.size()?;
        if !region.is_within(size) {
            return Err(PipelineError::InvalidGeometry(format!(
                "crop {}x{}+{}+{} outside {size}",
                region.width, region.height, region.x, region.y
            )));
        }
        let img = self.loaded()?;
        let cropped = img.crop_imm(region.x, region.y, region.width, region.height);
        self.image = Some(cropped);
        Ok(())
    }

    fn scale(&mut self, factor: f64) -> Result<(), PipelineError> {
        let target = self.size()?.scaled(factor);
        if target.is_empty() {
            return Err(PipelineError::Transform(format!(
                "scaling by {factor} leaves no pixels"
            )));
        }
        let filter: image::imageops::FilterType = self.interpolation.into();
        let img = self.loaded()?;
        let scaled = img.resize_exact(target.width, target.height, filter);
        self.image = Some(scaled);
        Ok(())
    }

    fn rotate(&mut self, degrees: f64) -> Result<(), PipelineError> {
        let interpolation = self.interpolation;
        let img = self.loaded()?;
        let rotated = match quarter_turns(degrees) {
            Some(0) => return Ok(()),
            Some(1) => img.rotate90(),
            Some(2) => img.rotate180(),
            Some(3) => img.rotate270(),
            _ => rotate_any(img, degrees, interpolation),
        };
        if rotated.width() == 0 || rotated.height() == 0 {
            return Err(PipelineError::Transform(format!(
                "rotation by {degrees} leaves no pixels"
            )));
        }
        self.image = Some(rotated);
        Ok(())
    }

    fn mirror(&mut self, axis_degrees: f64) -> Result<(), PipelineError> {
        let img = self.loaded_mut()?;
        *img = match mirror_flip(axis_degrees) {
            Flip::Horizontal => img.fliph(),
            Flip::Vertical => img.flipv(),
        };
        Ok(())
    }

    fn enhance(&mut self, mult: f32, add: f32) -> Result<(), PipelineError> {
        let img = self.loaded_mut()?;
        let (data, channels, color) = raw_mut(img)
            .ok_or_else(|| PipelineError::Transform("unsupported pixel layout".into()))?;
        affine(data, channels, color, &[mult; 3], &[add; 3]);
        Ok(())
    }

    fn enhance_color(&mut self, mult: [f32; 3], add: [f32; 3]) -> Result<(), PipelineError> {
        let order = self.channel_order();
        let img = self.loaded_mut()?;
        let Some((data, channels, 3)) = raw_mut(img) else {
            log::error!("enhance_color needs 3 color channels, skipping");
            return Ok(());
        };
        affine(
            data,
            channels,
            3,
            &rgb_ordered(mult, order),
            &rgb_ordered(add, order),
        );
        Ok(())
    }

    fn color_op(&mut self, op: ColorOp) -> Result<(), PipelineError> {
        let img = self.loaded_mut()?;
        let (data, channels, color) = raw_mut(img)
            .ok_or_else(|| PipelineError::Transform("unsupported pixel layout".into()))?;
        for px in data.chunks_exact_mut(channels) {
            match (op, color) {
                (ColorOp::Invert, _) => {
                    for c in &mut px[..color] {
                        *c = 255 - *c;
                    }
                }
                // already gray
                (_, 1) => {}
                (ColorOp::Grayscale, _) => {
                    let v = ((px[0] as u16 + px[1] as u16 + px[2] as u16) as f32 / 3.0).round() as u8;
                    px[..3].fill(v);
                }
                (ColorOp::NtscGray, _) => {
                    let v = (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
                        .round()
                        .clamp(0.0, 255.0) as u8;
                    px[..3].fill(v);
                }
            }
        }
        Ok(())
    }

    fn encode(&mut self, mime: &str, out: &mut dyn Write) -> Result<(), PipelineError> {
        let img = self.loaded()?;
        let result = match mime {
            "image/jpeg" => {
                // JPEG has no alpha channel
                let opaque = match img {
                    DynamicImage::ImageLumaA8(_) => DynamicImage::ImageLuma8(img.to_luma8()),
                    DynamicImage::ImageRgba8(_) => DynamicImage::ImageRgb8(img.to_rgb8()),
                    _ => img.clone(),
                };
                opaque.write_with_encoder(JpegEncoder::new_with_quality(&mut *out, JPEG_QUALITY))
            }
            "image/png" => img.write_with_encoder(PngEncoder::new(&mut *out)),
            other => return Err(PipelineError::UnsupportedFormat(other.to_string())),
        };
        result.map_err(|e| PipelineError::Transform(format!("{mime} encode failed: {e}")))?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, Rgb, RgbImage};

    #[test]
    fn supported_extensions_match_decodable_formats() {
        let exts = super::supported_input_extensions();
        for expected in &["jpg", "jpeg", "png", "tif", "tiff", "webp", "gif"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
    }

    /// Create a small valid JPEG file with the given dimensions.
    fn create_test_jpeg(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let file = std::fs::File::create(path).unwrap();
        let writer = std::io::BufWriter::new(file);
        JpegEncoder::new(writer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
    }

    fn create_test_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 0, 0]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    fn rgb_pipeline(img: RgbImage) -> RustPipeline {
        RustPipeline::from_image(DynamicImage::ImageRgb8(img))
    }

    fn pixel(p: &RustPipeline, x: u32, y: u32) -> [u8; 3] {
        p.image().unwrap().to_rgb8().get_pixel(x, y).0
    }

    // =========================================================================
    // Backend
    // =========================================================================

    #[test]
    fn inspect_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let info = RustBackend::new().inspect(&path).unwrap();
        assert_eq!(info.size, ImageSize::new(200, 150));
        assert_eq!(info.mime, "image/jpeg");
    }

    #[test]
    fn inspect_detects_content_not_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("actually-png.jpg");
        create_test_png(&path, 10, 20);

        let info = RustBackend::new().inspect(&path).unwrap();
        assert_eq!(info.mime, "image/png");
        assert_eq!(info.size, ImageSize::new(10, 20));
    }

    #[test]
    fn inspect_nonexistent_file_errors() {
        let result = RustBackend::new().inspect(Path::new("/nonexistent/image.jpg"));
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[test]
    fn resolution_of_jpeg_with_density() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("dpi.jpg");
        let img = RgbImage::new(8, 8);
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = JpegEncoder::new(file);
        encoder.set_pixel_density(image::codecs::jpeg::PixelDensity::dpi(300));
        encoder
            .write_image(img.as_raw(), 8, 8, image::ExtendedColorType::Rgb8)
            .unwrap();

        let res = RustBackend::new().read_resolution(&path).unwrap();
        assert_eq!(res, Resolution { x: 300.0, y: 300.0 });
    }

    // =========================================================================
    // Load
    // =========================================================================

    #[test]
    fn load_garbage_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"\xFF\xD8not really a jpeg").unwrap();

        let mut p = RustPipeline::new();
        assert!(matches!(p.load(&path), Err(PipelineError::Decode(_))));
    }

    #[test]
    fn operations_before_load_fail() {
        let mut p = RustPipeline::new();
        assert!(matches!(p.scale(0.5), Err(PipelineError::NotLoaded)));
        assert!(matches!(p.size(), Err(PipelineError::NotLoaded)));
    }

    #[test]
    fn load_region_subsamples_during_copy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src.png");
        create_test_png(&path, 100, 60);

        let mut p = RustPipeline::new();
        p.load_region(&path, PixelRect::new(10, 0, 41, 30), 4).unwrap();
        // ceil(41 / 4) = 11, ceil(30 / 4) = 8
        assert_eq!(p.size().unwrap(), ImageSize::new(11, 8));
        // column x of the buffer is source column 10 + 4x, red = source x
        assert_eq!(pixel(&p, 0, 0)[0], 10);
        assert_eq!(pixel(&p, 2, 0)[0], 18);
    }

    #[test]
    fn jpeg_region_is_reduced_while_decoding() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src.jpg");
        create_test_jpeg(&path, 64, 48);

        let reduced = decode_jpeg_reduced(&path, 4).unwrap().unwrap();
        assert_eq!(reduced.denom, 4);
        assert_eq!(reduced.full, ImageSize::new(64, 48));
        assert_eq!((reduced.image.width(), reduced.image.height()), (16, 12));

        let mut p = RustPipeline::new();
        p.load_region(&path, PixelRect::new(8, 8, 32, 16), 4).unwrap();
        assert_eq!(p.size().unwrap(), ImageSize::new(8, 4));
    }

    #[test]
    fn jpeg_stride_with_leftover_step() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src.jpg");
        create_test_jpeg(&path, 96, 64);

        // 1/2 from the decoder, every 3rd pixel of that
        let reduced = decode_jpeg_reduced(&path, 6).unwrap().unwrap();
        assert_eq!(reduced.denom, 2);

        let mut p = RustPipeline::new();
        p.load_region(&path, PixelRect::new(0, 0, 96, 64), 6).unwrap();
        assert_eq!(p.size().unwrap(), ImageSize::new(16, 11));
    }

    #[test]
    fn reduced_decode_skips_other_cases() {
        let tmp = tempfile::TempDir::new().unwrap();
        let jpeg = tmp.path().join("src.jpg");
        let png = tmp.path().join("src.png");
        create_test_jpeg(&jpeg, 64, 48);
        create_test_png(&png, 64, 48);

        // no DCT scale divides an odd stride
        assert!(decode_jpeg_reduced(&jpeg, 3).unwrap().is_none());
        assert!(decode_jpeg_reduced(&png, 4).unwrap().is_none());

        let mut p = RustPipeline::new();
        p.load_region(&jpeg, PixelRect::new(0, 0, 64, 48), 3).unwrap();
        assert_eq!(p.size().unwrap(), ImageSize::new(22, 16));
    }

    #[test]
    fn jpeg_region_outside_image_is_invalid_geometry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src.jpg");
        create_test_jpeg(&path, 64, 48);

        let mut p = RustPipeline::new();
        let result = p.load_region(&path, PixelRect::new(40, 40, 32, 32), 2);
        assert!(matches!(result, Err(PipelineError::InvalidGeometry(_))));
    }

    #[test]
    fn load_region_outside_image_is_invalid_geometry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("src.png");
        create_test_png(&path, 50, 50);

        let mut p = RustPipeline::new();
        let result = p.load_region(&path, PixelRect::new(40, 40, 20, 20), 1);
        assert!(matches!(result, Err(PipelineError::InvalidGeometry(_))));
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    #[test]
    fn crop_then_scale() {
        let mut p = rgb_pipeline(RgbImage::new(200, 100));
        p.crop(PixelRect::new(50, 0, 100, 100)).unwrap();
        p.scale(0.25).unwrap();
        assert_eq!(p.size().unwrap(), ImageSize::new(25, 25));
    }

    #[test]
    fn crop_outside_bounds_fails() {
        let mut p = rgb_pipeline(RgbImage::new(20, 20));
        let result = p.crop(PixelRect::new(15, 0, 10, 10));
        assert!(matches!(result, Err(PipelineError::InvalidGeometry(_))));
    }

    #[test]
    fn scale_to_nothing_is_transform_error() {
        let mut p = rgb_pipeline(RgbImage::new(4, 4));
        assert!(matches!(p.scale(0.01), Err(PipelineError::Transform(_))));
    }

    #[test]
    fn quarter_rotation_is_clockwise() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let mut p = rgb_pipeline(img);
        p.rotate(90.0).unwrap();
        assert_eq!(p.size().unwrap(), ImageSize::new(2, 3));
        // top-left moves to top-right
        assert_eq!(pixel(&p, 1, 0), [255, 0, 0]);
    }

    #[test]
    fn arbitrary_rotation_expands_canvas() {
        let mut p = rgb_pipeline(RgbImage::from_pixel(100, 100, Rgb([200, 200, 200])));
        p.rotate(45.0).unwrap();
        assert_eq!(p.size().unwrap(), ImageSize::new(142, 142));
        // center keeps content, corners are empty
        assert_eq!(pixel(&p, 71, 71), [200, 200, 200]);
        assert_eq!(pixel(&p, 0, 0), [0, 0, 0]);
    }

    #[test]
    fn mirror_axis_selects_flip() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));

        let mut p = rgb_pipeline(img.clone());
        p.mirror(0.0).unwrap();
        assert_eq!(pixel(&p, 1, 0), [255, 0, 0]);

        let mut p = rgb_pipeline(img);
        p.mirror(90.0).unwrap();
        assert_eq!(pixel(&p, 0, 1), [255, 0, 0]);
    }

    // =========================================================================
    // Photometric
    // =========================================================================

    #[test]
    fn enhance_applies_to_all_channels() {
        let mut p = rgb_pipeline(RgbImage::from_pixel(1, 1, Rgb([10, 20, 200])));
        p.enhance(2.0, 5.0).unwrap();
        assert_eq!(pixel(&p, 0, 0), [25, 45, 255]);
    }

    #[test]
    fn enhance_leaves_alpha_alone() {
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([10, 10, 10, 100]));
        let mut p = RustPipeline::from_image(DynamicImage::ImageRgba8(img));
        p.enhance(2.0, 0.0).unwrap();
        assert_eq!(p.image().unwrap().to_rgba8().get_pixel(0, 0).0, [20, 20, 20, 100]);
    }

    #[test]
    fn enhance_color_per_channel() {
        let mut p = rgb_pipeline(RgbImage::from_pixel(1, 1, Rgb([10, 10, 10])));
        p.enhance_color([1.0, 2.0, 3.0], [0.0, 0.0, 5.0]).unwrap();
        assert_eq!(pixel(&p, 0, 0), [10, 20, 35]);
    }

    #[test]
    fn enhance_color_on_gray_is_noop() {
        let img = image::GrayImage::from_pixel(1, 1, image::Luma([50]));
        let mut p = RustPipeline::from_image(DynamicImage::ImageLuma8(img));
        p.enhance_color([2.0; 3], [0.0; 3]).unwrap();
        assert_eq!(p.image().unwrap().to_luma8().get_pixel(0, 0).0, [50]);
    }

    #[test]
    fn color_ops() {
        let mut p = rgb_pipeline(RgbImage::from_pixel(1, 1, Rgb([30, 60, 90])));
        p.color_op(ColorOp::Grayscale).unwrap();
        assert_eq!(pixel(&p, 0, 0), [60, 60, 60]);

        let mut p = rgb_pipeline(RgbImage::from_pixel(1, 1, Rgb([100, 0, 0])));
        p.color_op(ColorOp::NtscGray).unwrap();
        assert_eq!(pixel(&p, 0, 0), [30, 30, 30]);

        let mut p = rgb_pipeline(RgbImage::from_pixel(1, 1, Rgb([0, 100, 255])));
        p.color_op(ColorOp::Invert).unwrap();
        assert_eq!(pixel(&p, 0, 0), [255, 155, 0]);
    }

    // =========================================================================
    // Encode
    // =========================================================================

    #[test]
    fn encode_jpeg_and_png() {
        let mut p = rgb_pipeline(RgbImage::new(16, 8));
        let mut jpeg = Vec::new();
        p.encode("image/jpeg", &mut jpeg).unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));

        let mut png = Vec::new();
        p.encode("image/png", &mut png).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn encode_jpeg_drops_alpha() {
        let img = image::RgbaImage::new(4, 4);
        let mut p = RustPipeline::from_image(DynamicImage::ImageRgba8(img));
        let mut out = Vec::new();
        p.encode("image/jpeg", &mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn encode_unsupported_type_errors() {
        let mut p = rgb_pipeline(RgbImage::new(4, 4));
        let mut out = Vec::new();
        let result = p.encode("image/gif", &mut out);
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    // =========================================================================
    // Operation order
    // =========================================================================

    /// Rotating a reduced buffer interpolates between different source
    /// neighbours than reducing a rotated one.
    #[test]
    fn scale_then_rotate_differs_from_rotate_then_scale() {
        let img = RgbImage::from_fn(64, 64, |x, y| {
            Rgb([((x * 37 + y * 11) % 256) as u8, ((x * y) % 256) as u8, (y * 4 % 256) as u8])
        });
        let crop = PixelRect::new(0, 0, 64, 40);

        let mut a = rgb_pipeline(img.clone());
        a.crop(crop).unwrap();
        a.scale(0.3).unwrap();
        a.rotate(30.0).unwrap();

        let mut b = rgb_pipeline(img);
        b.crop(crop).unwrap();
        b.rotate(30.0).unwrap();
        b.scale(0.3).unwrap();

        let (ia, ib) = (a.image().unwrap().to_rgb8(), b.image().unwrap().to_rgb8());
        assert_ne!(ia.dimensions(), (0, 0));
        let differs = ia.dimensions() != ib.dimensions() || ia.as_raw() != ib.as_raw();
        assert!(differs);
    }
}
