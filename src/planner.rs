//! Job planning: from request parameters to an unambiguous pixel plan.
//!
//! A request names a window of an image, a destination box and a handful of
//! mode flags; several of these are optional or redundant. [`JobPlanner`]
//! derives everything else lazily, each value at most once per request:
//!
//! ```text
//! hires size ──► destination (dw, dh) ──► expected source size
//!                                              │
//!                                              ▼
//!                 pyramid selection ──► chosen source asset
//!                                              │
//!                                              ▼
//!                        scale factor + user area ──► inner / outer area
//! ```
//!
//! The destination aspect ratio comes from the biggest asset of the pyramid,
//! never from the chosen one, so choosing a source can depend on the
//! destination size without a cycle. All assets of a pyramid show the same
//! content, so the aspect ratios agree up to rounding.
//!
//! Derived `dw`/`dh` values are written back into the planner's parameter
//! map, so every later read sees the same number.
//!
//! [`plan_job`] drives the planner and decides between sending the source file
//! untouched ([`Plan::Passthrough`]) and rendering an immutable [`JobPlan`].

use crate::config::ScalerConfig;
use crate::error::ScalerError;
use crate::geometry::{ImageSize, Rect};
use crate::imaging::ScaleQuality;
use crate::imaging::calculations::{output_mime, rotation_coverage};
use crate::params::{
    Modes, Operations, OutputFormat, ParameterMap, ResolutionPolicy, ScaleSource, SendAsFile,
    TargetMode,
};
use crate::pyramid::{Pyramid, PyramidLookup};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Source types a client can display without conversion.
const SENDABLE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

/// MIME type of `mo=rawfile` responses.
const RAW_FILE_MIME: &str = "application/octet-stream";

/// The asset chosen for decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceChoice {
    pub path: PathBuf,
    pub size: ImageSize,
    pub mime: String,
}

/// Everything the runner needs to render one request.
#[derive(Debug, Clone, Serialize)]
pub struct JobPlan {
    pub source: SourceChoice,
    pub hires_size: ImageSize,
    pub destination: ImageSize,
    pub expected_source_size: ImageSize,
    pub scale: f64,
    /// Requested window in source pixels.
    pub user_area: Rect,
    /// Area the output shows. Larger than `user_area` only with whole-rotation coverage.
    pub inner_area: Rect,
    /// Area decoded from the source, clipped to the image.
    pub outer_area: Rect,
    /// Crop the rotated buffer to `inner_area` after rotation.
    pub whole_rotation: bool,
    pub quality: ScaleQuality,
    pub output_mime: String,
    pub operations: Operations,
    pub min_subsample: u32,
    pub modes: Modes,
}

/// The source file sent back without decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassthroughPlan {
    pub path: PathBuf,
    pub mime: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Plan {
    Passthrough(PassthroughPlan),
    Render(JobPlan),
}

/// Plan one request.
///
/// Returns a passthrough when the client asked for the file (and sending
/// files is allowed) or when the chosen source already satisfies the request
/// without any transformation.
pub fn plan_job(
    params: &ParameterMap,
    lookup: &dyn PyramidLookup,
    config: &ScalerConfig,
) -> Result<Plan, ScalerError> {
    let mut planner = JobPlanner::new(params.clone(), lookup, config)?;
    if let Some(file) = planner.file_passthrough()? {
        return Ok(Plan::Passthrough(file));
    }
    if !planner.is_transform_required()? {
        let source = planner.source_asset()?;
        debug!("{} needs no transformation", source.path.display());
        return Ok(Plan::Passthrough(PassthroughPlan {
            path: source.path,
            mime: source.mime,
        }));
    }
    Ok(Plan::Render(planner.into_plan()?))
}

/// Lazily derives the geometry of one request.
///
/// Every getter computes its value on first call and returns the cached value
/// afterwards. The planner owns its copy of the parameters; nothing outside
/// it mutates them.
pub struct JobPlanner<'a> {
    params: ParameterMap,
    modes: Modes,
    operations: Operations,
    config: &'a ScalerConfig,
    pyramid: Arc<Pyramid>,
    hires: Option<ImageSize>,
    destination: Option<ImageSize>,
    expected: Option<ImageSize>,
    source: Option<SourceChoice>,
    sampling: Option<(f64, Rect)>,
    areas: Option<(Rect, Rect)>,
}

impl<'a> JobPlanner<'a> {
    /// Resolve modes and operations and look up the pyramid.
    pub fn new(
        params: ParameterMap,
        lookup: &dyn PyramidLookup,
        config: &'a ScalerConfig,
    ) -> Result<Self, ScalerError> {
        let modes = Modes::from_options(params.options());
        let operations = Operations::from_params(&params, &modes)?;
        let path = params.file_path()?;
        let page = params.page()?;
        let pyramid = lookup
            .find(&path, page)
            .ok_or_else(|| ScalerError::AssetNotFound(format!("{path} (page {page})")))?;
        Ok(Self {
            params,
            modes,
            operations,
            config,
            pyramid,
            hires: None,
            destination: None,
            expected: None,
            source: None,
            sampling: None,
            areas: None,
        })
    }

    pub fn params(&self) -> &ParameterMap {
        &self.params
    }

    pub fn modes(&self) -> &Modes {
        &self.modes
    }

    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    pub fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    fn not_found(&self) -> ScalerError {
        ScalerError::AssetNotFound(format!("no readable image for '{}'", self.params.get_str("fn")))
    }

    /// `ws`, which must be positive.
    fn window_scale(&self) -> Result<f64, ScalerError> {
        let ws = self.params.get_float("ws")?;
        if ws <= 0.0 {
            return Err(ScalerError::InvalidGeometry(format!("ws must be positive, got {ws}")));
        }
        Ok(ws)
    }

    /// The relative window `wx, wy, ww, wh`.
    fn window(&self) -> Result<Rect, ScalerError> {
        Ok(Rect::new(
            self.params.get_float("wx")?,
            self.params.get_float("wy")?,
            self.params.get_float("ww")?,
            self.params.get_float("wh")?,
        ))
    }

    fn explicit_scale(&self) -> Result<f64, ScalerError> {
        let scale = self.params.get_float("scale")?;
        if scale <= 0.0 {
            return Err(ScalerError::InvalidGeometry(format!(
                "scale must be positive, got {scale}"
            )));
        }
        Ok(scale)
    }

    /// Pixel size of the biggest asset.
    pub fn hires_size(&mut self) -> Result<ImageSize, ScalerError> {
        if let Some(size) = self.hires {
            return Ok(size);
        }
        let pyramid = Arc::clone(&self.pyramid);
        let asset = pyramid.biggest().ok_or_else(|| self.not_found())?;
        let size = asset.size(pyramid.backend())?;
        self.hires = Some(size);
        Ok(size)
    }

    /// Destination size `(dw, dh)`.
    ///
    /// A zero dimension is derived from the other through the image's aspect
    /// ratio and stored back into the parameters. With `max_image_size` set,
    /// each dimension is capped so that `d * ws` stays within it.
    pub fn destination_size(&mut self) -> Result<ImageSize, ScalerError> {
        if let Some(size) = self.destination {
            return Ok(size);
        }
        let mut dw = self.params.get_int("dw")?.clamp(0, u32::MAX as i64) as u32;
        let mut dh = self.params.get_int("dh")?.clamp(0, u32::MAX as i64) as u32;
        if dw == 0 && dh == 0 {
            return Err(ScalerError::InvalidGeometry(
                "destination size is 0x0, set dw or dh".into(),
            ));
        }
        if dw == 0 || dh == 0 {
            let aspect = self.hires_size()?.aspect();
            if aspect <= 0.0 {
                return Err(ScalerError::InvalidGeometry(
                    "image has no aspect ratio".into(),
                ));
            }
            if dw == 0 {
                dw = (dh as f64 * aspect).round() as u32;
                self.params.set_value("dw", dw);
            } else {
                dh = (dw as f64 / aspect).round() as u32;
                self.params.set_value("dh", dh);
            }
        }

        let max = self.config.max_image_size;
        if max > 0 {
            let limit = (max as f64 / self.window_scale()?).floor() as u32;
            if dw > limit {
                debug!("clamping dw {dw} to {limit}");
                dw = limit;
                self.params.set_value("dw", dw);
            }
            if dh > limit {
                debug!("clamping dh {dh} to {limit}");
                dh = limit;
                self.params.set_value("dh", dh);
            }
        }

        let size = ImageSize::new(dw, dh);
        self.destination = Some(size);
        Ok(size)
    }

    /// Smallest source size that still satisfies the request.
    pub fn expected_source_size(&mut self) -> Result<ImageSize, ScalerError> {
        if let Some(size) = self.expected {
            return Ok(size);
        }
        let ws = self.window_scale()?;
        let size = match self.modes.target {
            TargetMode::ScaleToFit => {
                let window = self.window()?;
                let fraction = window.width.min(window.height);
                if fraction <= 0.0 {
                    return Err(ScalerError::InvalidGeometry(format!(
                        "window {}x{} is empty",
                        window.width, window.height
                    )));
                }
                truncated(self.destination_size()?, ws / fraction)
            }
            TargetMode::AbsoluteScale(ScaleSource::Explicit) => {
                let scale = self.explicit_scale()?;
                self.hires_size()?.scaled(scale)
            }
            TargetMode::AbsoluteScale(ScaleSource::Dpi) | TargetMode::CropToFit => {
                truncated(self.destination_size()?, ws)
            }
        };
        debug!("expected source size {size}");
        self.expected = Some(size);
        Ok(size)
    }

    /// The asset to decode, chosen by the resolution policy.
    pub fn source_asset(&mut self) -> Result<SourceChoice, ScalerError> {
        if let Some(source) = &self.source {
            return Ok(source.clone());
        }
        let pyramid = Arc::clone(&self.pyramid);
        let asset = match self.modes.resolution {
            ResolutionPolicy::Hires => pyramid.biggest(),
            ResolutionPolicy::Lores => {
                let expected = self.expected_source_size()?;
                pyramid
                    .next_smaller_than(expected)
                    .or_else(|| pyramid.smallest())
            }
            ResolutionPolicy::Autores => {
                let expected = self.expected_source_size()?;
                pyramid
                    .next_bigger_than(expected)
                    .or_else(|| pyramid.biggest())
            }
        };
        let asset = asset.ok_or_else(|| self.not_found())?;
        let backend = pyramid.backend();
        let mime = match asset.mime_type(backend) {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => {
                return Err(ScalerError::AssetNotFound(format!(
                    "cannot determine the type of {}",
                    asset.path().display()
                )));
            }
        };
        let size = asset.size(backend)?;
        info!("planning to load {} ({size}, {mime})", asset.path().display());

        let source = SourceChoice {
            path: asset.path().to_path_buf(),
            size,
            mime,
        };
        self.source = Some(source.clone());
        Ok(source)
    }

    /// Display resolution over source resolution, averaged over both axes.
    fn dpi_scale(&self) -> Result<f64, ScalerError> {
        let source = self
            .pyramid
            .resolution()
            .filter(|r| r.x > 0.0 && r.y > 0.0)
            .ok_or_else(|| {
                ScalerError::MissingMetadata("source image has no resolution".into())
            })?;
        // per-axis values only count as a pair; otherwise ddpi covers both
        let mut ddpix = self.params.get_float("ddpix")?;
        let mut ddpiy = self.params.get_float("ddpiy")?;
        if ddpix <= 0.0 || ddpiy <= 0.0 {
            let ddpi = self.params.get_float("ddpi")?;
            (ddpix, ddpiy) = (ddpi, ddpi);
        }
        if ddpix <= 0.0 || ddpiy <= 0.0 {
            return Err(ScalerError::MissingMetadata(
                "display resolution not set (ddpi or ddpix/ddpiy)".into(),
            ));
        }
        Ok((ddpix / source.x + ddpiy / source.y) / 2.0)
    }

    /// Scale factor and user area, derived together.
    fn sampling(&mut self) -> Result<(f64, Rect), ScalerError> {
        if let Some(sampling) = self.sampling {
            return Ok(sampling);
        }
        let source = self.source_asset()?;
        let dest = self.destination_size()?;
        let ws = self.window_scale()?;
        let area = self
            .window()?
            .scaled(source.size.width as f64, source.size.height as f64);
        let (dw, dh) = (dest.width as f64, dest.height as f64);

        let sampling = match self.modes.target {
            TargetMode::ScaleToFit => {
                let scale_x = dw / area.width * ws;
                let scale_y = dh / area.height * ws;
                debug!("scale-to-fit factors {scale_x} x {scale_y}");
                (scale_x.min(scale_y), area)
            }
            TargetMode::AbsoluteScale(from) => {
                let mut scale = match from {
                    ScaleSource::Dpi => self.dpi_scale()?,
                    ScaleSource::Explicit => self.explicit_scale()?,
                };
                let hires = self.hires_size()?;
                if source.size.width != hires.width && source.size.width > 0 {
                    scale *= hires.width as f64 / source.size.width as f64;
                }
                (scale, area.with_size(dw / scale * ws, dh / scale * ws))
            }
            TargetMode::CropToFit => (1.0, area.with_size(dw * ws, dh * ws)),
        };
        debug!("scale {} over user area {:?}", sampling.0, sampling.1);
        self.sampling = Some(sampling);
        Ok(sampling)
    }

    /// Uniform scale applied to the sampled source pixels.
    pub fn scale_factor(&mut self) -> Result<f64, ScalerError> {
        Ok(self.sampling()?.0)
    }

    /// The requested window in source pixel coordinates.
    ///
    /// With absolute scaling and crop-to-fit the extent is replaced by what
    /// the destination box needs at the chosen scale.
    pub fn user_area(&mut self) -> Result<Rect, ScalerError> {
        Ok(self.sampling()?.1)
    }

    fn areas(&mut self) -> Result<(Rect, Rect), ScalerError> {
        if let Some(areas) = self.areas {
            return Ok(areas);
        }
        let (scale, user) = self.sampling()?;
        let bounds = Rect::from_size(self.source_asset()?.size);
        let (inner, outer) = if self.whole_rotation() {
            rotation_coverage(user, self.operations.rotation)
        } else {
            (user, user)
        };
        let outer = outer.intersection(&bounds);

        if outer.width < 1.0 || outer.height < 1.0 {
            return Err(ScalerError::InvalidGeometry(format!(
                "sampled area {:.2}x{:.2} px is empty",
                outer.width, outer.height
            )));
        }
        if scale * outer.width < 2.0 || scale * outer.height < 2.0 {
            return Err(ScalerError::InvalidGeometry(format!(
                "output of {:.2}x{:.2} px is too small",
                scale * outer.width,
                scale * outer.height
            )));
        }
        self.areas = Some((inner, outer));
        Ok((inner, outer))
    }

    /// Area the output shows.
    pub fn inner_user_area(&mut self) -> Result<Rect, ScalerError> {
        Ok(self.areas()?.0)
    }

    /// Area to decode: the user area clipped to the image, grown first to
    /// cover a rotated window when whole-rotation coverage is on.
    pub fn outer_user_area(&mut self) -> Result<Rect, ScalerError> {
        Ok(self.areas()?.1)
    }

    fn whole_rotation(&self) -> bool {
        self.config.whole_rotation_area && self.operations.rotation != 0.0
    }

    pub fn quality(&self) -> ScaleQuality {
        self.modes
            .quality
            .unwrap_or_else(|| self.config.default_quality())
    }

    pub fn output_mime(&mut self) -> Result<&'static str, ScalerError> {
        let source = self.source_asset()?;
        Ok(output_mime(self.modes.output, &source.mime))
    }

    /// The source can be shown as is: a browser-displayable type and no
    /// operation beyond resampling.
    pub fn is_sendable_without_transform(&mut self) -> Result<bool, ScalerError> {
        let source = self.source_asset()?;
        let displayable = SENDABLE_TYPES.contains(&source.mime.as_str());
        let keeps_type = self.modes.output == OutputFormat::Auto
            || output_mime(self.modes.output, &source.mime) == source.mime;
        Ok(displayable && keeps_type && !self.operations.any())
    }

    /// Whether the pixel pipeline has to run at all.
    ///
    /// Not required when the source is sendable and already no bigger than
    /// needed: strictly smaller for `lores`, fitting for `autores`.
    pub fn is_transform_required(&mut self) -> Result<bool, ScalerError> {
        if !self.is_sendable_without_transform()? {
            return Ok(true);
        }
        let size = self.source_asset()?.size;
        let expected = self.expected_source_size()?;
        let small_enough = match self.modes.resolution {
            ResolutionPolicy::Lores => size.is_smaller_than(expected),
            ResolutionPolicy::Autores => size.fits_in(expected),
            ResolutionPolicy::Hires => false,
        };
        Ok(!small_enough)
    }

    /// The biggest asset as a file response, for `mo=file` / `mo=rawfile`.
    fn file_passthrough(&mut self) -> Result<Option<PassthroughPlan>, ScalerError> {
        let raw = match self.modes.send_as_file {
            SendAsFile::No => return Ok(None),
            SendAsFile::File => false,
            SendAsFile::Raw => true,
        };
        if !self.config.send_file_allowed {
            warn!("sending files is disabled, rendering instead");
            return Ok(None);
        }
        let pyramid = Arc::clone(&self.pyramid);
        let asset = pyramid.biggest().ok_or_else(|| self.not_found())?;
        let mime = if raw {
            RAW_FILE_MIME.to_string()
        } else {
            asset
                .mime_type(pyramid.backend())
                .map(str::to_string)
                .ok_or_else(|| self.not_found())?
        };
        Ok(Some(PassthroughPlan {
            path: asset.path().to_path_buf(),
            mime,
        }))
    }

    /// Derive every field and freeze them into a [`JobPlan`].
    pub fn into_plan(mut self) -> Result<JobPlan, ScalerError> {
        let source = self.source_asset()?;
        let hires_size = self.hires_size()?;
        let destination = self.destination_size()?;
        let expected_source_size = self.expected_source_size()?;
        let (scale, user_area) = self.sampling()?;
        let (inner_area, outer_area) = self.areas()?;
        let output_mime = self.output_mime()?.to_string();
        Ok(JobPlan {
            source,
            hires_size,
            destination,
            expected_source_size,
            scale,
            user_area,
            inner_area,
            outer_area,
            whole_rotation: self.whole_rotation(),
            quality: self.quality(),
            output_mime,
            operations: self.operations,
            min_subsample: self.config.min_subsample,
            modes: self.modes,
        })
    }
}

/// `size * factor` with each dimension truncated.
fn truncated(size: ImageSize, factor: f64) -> ImageSize {
    ImageSize::new(
        (size.width as f64 * factor) as u32,
        (size.height as f64 * factor) as u32,
    )
}
