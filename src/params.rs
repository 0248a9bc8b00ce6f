//! Request parameters and the mode set derived from them.
//!
//! The transport hands over a flat set of named values. [`ParameterMap`] holds
//! them as strings with the documented defaults and offers typed accessors;
//! [`Modes`] resolves the `mo` option flags exactly once into closed enums so
//! nothing downstream tests option strings again.
//!
//! ## Parameters
//!
//! | Name | Default | Meaning |
//! |---|---|---|
//! | `fn` | `""` | path of the image (or directory) relative to the base dirs |
//! | `pn` | `1` | page number when `fn` names a directory |
//! | `dw`, `dh` | `0` | destination width/height in pixels; `0` = derive from aspect |
//! | `wx`, `wy` | `0` | window origin, relative `[0, 1]` |
//! | `ww`, `wh` | `1` | window extent, relative `[0, 1]` |
//! | `ws` | `1` | additional scale factor |
//! | `mo` | `""` | comma-separated option flags |
//! | `rot` | `0` | rotation in degrees |
//! | `cont`, `brgt` | `0` | contrast exponent, brightness offset |
//! | `rgbm`, `rgba` | `0/0/0` | per-channel multiplier exponents / offsets |
//! | `ddpi`, `ddpix`, `ddpiy` | `0` | display resolution |
//! | `scale` | `1` | explicit scale for `mo=ascale` |
//! | `colop` | `""` | color operation (`grayscale`, `ntsc_gray`, `invert`) |

use crate::imaging::{ColorOp, ScaleQuality};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("parameter '{name}' has invalid value '{value}'")]
    Invalid { name: String, value: String },
    #[error("parameter '{name}' needs 3 '/'-separated values, got '{value}'")]
    BadVector { name: String, value: String },
    #[error("path '{0}' leaves the image root")]
    PathEscape(String),
}

/// Defaults for every parameter the planner reads.
const DEFAULTS: &[(&str, &str)] = &[
    ("fn", ""),
    ("pn", "1"),
    ("dw", "0"),
    ("dh", "0"),
    ("wx", "0"),
    ("wy", "0"),
    ("ww", "1"),
    ("wh", "1"),
    ("ws", "1"),
    ("mo", ""),
    ("rot", "0"),
    ("cont", "0"),
    ("brgt", "0"),
    ("rgbm", "0/0/0"),
    ("rgba", "0/0/0"),
    ("ddpi", "0"),
    ("ddpix", "0"),
    ("ddpiy", "0"),
    ("scale", "1"),
    ("colop", ""),
];

/// "No adjustment" value of the `rgbm`/`rgba` vectors.
const NO_COLOR_ADJUSTMENT: &str = "0/0/0";

/// Named parameter bag with typed accessors.
#[derive(Debug, Clone)]
pub struct ParameterMap {
    values: BTreeMap<String, String>,
    options: OptionSet,
}

impl Default for ParameterMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterMap {
    /// A map holding only the defaults.
    pub fn new() -> Self {
        let values = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values,
            options: OptionSet::default(),
        }
    }

    /// Parse a `k=v&k=v` query string on top of the defaults.
    ///
    /// Decoding is `application/x-www-form-urlencoded`: `%XX` escapes and
    /// `+` as space. Keys with an empty value keep their default; unknown
    /// keys are kept but nothing reads them.
    pub fn from_query(query: &str) -> Self {
        let mut map = Self::new();
        let query = query.trim_start_matches('?');
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if !value.is_empty() {
                map.set_value(&key, value);
            }
        }
        map
    }

    /// Set a value; setting `mo` re-reads the option set.
    pub fn set_value(&mut self, name: &str, value: impl ToString) {
        let value = value.to_string();
        if name == "mo" {
            self.options = OptionSet::parse(&value);
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn get_str(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ParamError> {
        let raw = self.get_str(name).trim();
        if raw.is_empty() {
            return Ok(0);
        }
        // Clients send "300.0" for integer sizes more often than one would hope.
        raw.parse::<i64>()
            .or_else(|_| raw.parse::<f64>().map(|f| f.round() as i64))
            .map_err(|_| invalid(name, raw))
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ParamError> {
        let raw = self.get_str(name).trim();
        if raw.is_empty() {
            return Ok(0.0);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(invalid(name, raw)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ParamError> {
        match self.get_str(name).trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(invalid(name, other)),
        }
    }

    /// A 3-component `/`-delimited float vector.
    ///
    /// `None` when unset or equal to the `0/0/0` sentinel, which means "no
    /// adjustment", never a zero-valued operation.
    pub fn get_vector3(&self, name: &str) -> Result<Option<[f32; 3]>, ParamError> {
        let raw = self.get_str(name).trim();
        if raw.is_empty() || raw == NO_COLOR_ADJUSTMENT {
            return Ok(None);
        }
        let parts: Vec<&str> = raw.split('/').collect();
        if parts.len() != 3 {
            return Err(ParamError::BadVector {
                name: name.to_string(),
                value: raw.to_string(),
            });
        }
        let mut out = [0f32; 3];
        for (slot, part) in out.iter_mut().zip(parts) {
            *slot = part.trim().parse::<f32>().map_err(|_| ParamError::BadVector {
                name: name.to_string(),
                value: raw.to_string(),
            })?;
        }
        Ok(Some(out))
    }

    pub fn has_option(&self, flag: &str) -> bool {
        self.options.has(flag)
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    /// Normalized `fn` path: no empty or `.` segments, no leading slash.
    ///
    /// `..` segments are rejected so a request can never address files outside
    /// the configured base directories.
    pub fn file_path(&self) -> Result<String, ParamError> {
        let raw = self.get_str("fn");
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(ParamError::PathEscape(raw.to_string())),
                s => segments.push(s),
            }
        }
        Ok(segments.join("/"))
    }

    /// Page number, at least 1.
    pub fn page(&self) -> Result<u32, ParamError> {
        Ok(self.get_int("pn")?.max(1) as u32)
    }
}

fn invalid(name: &str, value: &str) -> ParamError {
    ParamError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// The `mo` option flags, lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet(Vec<String>);

impl OptionSet {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn has(&self, flag: &str) -> bool {
        self.0.iter().any(|o| o == flag)
    }
}

// =============================================================================
// Modes
// =============================================================================

/// Which asset of the pyramid to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Always the biggest asset.
    Hires,
    /// The next asset at or below the expected source size.
    Lores,
    /// The next asset at or above the expected source size.
    Autores,
}

/// Where an absolute scale factor comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSource {
    /// Original physical size: display DPI over source DPI (`mo=osize`).
    Dpi,
    /// The `scale` parameter (`mo=ascale`).
    Explicit,
}

/// How the destination box relates to the sampled window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    ScaleToFit,
    AbsoluteScale(ScaleSource),
    CropToFit,
}

/// Output type override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Auto,
    Jpeg,
    Png,
}

/// How the caller wants errors rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFormat {
    Image,
    Text,
}

/// Request to send the source file untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendAsFile {
    No,
    /// `mo=file`: keep the source MIME type.
    File,
    /// `mo=rawfile`: force `application/octet-stream`.
    Raw,
}

/// All mode flags of a request, resolved once.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Modes {
    pub resolution: ResolutionPolicy,
    pub target: TargetMode,
    pub output: OutputFormat,
    /// `q0`..`q2`; `None` means "use the configured default".
    pub quality: Option<ScaleQuality>,
    pub mirror_horizontal: bool,
    pub mirror_vertical: bool,
    pub send_as_file: SendAsFile,
    pub errors: ErrorFormat,
}

impl Modes {
    pub fn from_options(options: &OptionSet) -> Self {
        let resolution = if options.has("clip") || options.has("hires") {
            ResolutionPolicy::Hires
        } else if options.has("lores") {
            ResolutionPolicy::Lores
        } else {
            ResolutionPolicy::Autores
        };

        let target = if options.has("osize") {
            TargetMode::AbsoluteScale(ScaleSource::Dpi)
        } else if options.has("ascale") {
            TargetMode::AbsoluteScale(ScaleSource::Explicit)
        } else if options.has("clip") {
            TargetMode::CropToFit
        } else {
            TargetMode::ScaleToFit
        };

        let output = if options.has("png") {
            OutputFormat::Png
        } else if options.has("jpg") || options.has("jpeg") {
            OutputFormat::Jpeg
        } else {
            OutputFormat::Auto
        };

        let quality = ["q0", "q1", "q2"]
            .iter()
            .position(|q| options.has(q))
            .map(|level| ScaleQuality::new(level as u8));

        let send_as_file = if options.has("rawfile") {
            SendAsFile::Raw
        } else if options.has("file") {
            SendAsFile::File
        } else {
            SendAsFile::No
        };

        let errors = if options.has("errtxt") {
            ErrorFormat::Text
        } else {
            ErrorFormat::Image
        };

        Self {
            resolution,
            target,
            output,
            quality,
            mirror_horizontal: options.has("hmir"),
            mirror_vertical: options.has("vmir"),
            send_as_file,
            errors,
        }
    }
}

/// Geometric and photometric operations requested on top of the scaling.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct Operations {
    pub rotation: f64,
    pub mirror_horizontal: bool,
    pub mirror_vertical: bool,
    pub contrast: f32,
    pub brightness: f32,
    pub rgb_multiply: Option<[f32; 3]>,
    pub rgb_add: Option<[f32; 3]>,
    pub color_op: Option<ColorOp>,
}

impl Operations {
    pub fn from_params(params: &ParameterMap, modes: &Modes) -> Result<Self, ParamError> {
        let colop = params.get_str("colop").trim();
        let color_op = if colop.is_empty() {
            None
        } else {
            let parsed = ColorOp::parse(colop);
            if parsed.is_none() {
                log::error!("Invalid color op: {colop}");
            }
            parsed
        };

        Ok(Self {
            rotation: params.get_float("rot")?,
            mirror_horizontal: modes.mirror_horizontal,
            mirror_vertical: modes.mirror_vertical,
            contrast: params.get_float("cont")? as f32,
            brightness: params.get_float("brgt")? as f32,
            rgb_multiply: params.get_vector3("rgbm")?,
            rgb_add: params.get_vector3("rgba")?,
            color_op,
        })
    }

    /// Any operation that changes pixels beyond resampling.
    pub fn any(&self) -> bool {
        self.rotation != 0.0
            || self.mirror_horizontal
            || self.mirror_vertical
            || self.contrast != 0.0
            || self.brightness != 0.0
            || self.rgb_multiply.is_some()
            || self.rgb_add.is_some()
            || self.color_op.is_some()
    }
}
