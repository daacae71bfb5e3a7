//! Engine configuration schema.
//!
//! The engine is configured with a flat JSON object. It is parsed eagerly
//! into [`KycConfig`] at `init`: every recognized key is type-checked and
//! range-checked, unknown keys are ignored so newer documents keep working
//! with older engines.

use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Sentinel meaning "pick automatically" / "unbounded" for integer knobs.
pub const AUTO: i32 = -1;

/// Every key the schema recognizes.
pub const KNOWN_KEYS: &[&str] = &[
    "debug_level",
    "debug_write_input_image_enabled",
    "debug_internal_data_path",
    "gpu_ctrl_memory_enabled",
    "num_threads",
    "max_latency",
    "max_batchsize",
    "asm_enabled",
    "intrin_enabled",
    "openvino_activation",
    "openvino_device",
    "graph_type",
    "graph_2passes_enabled",
    "graph_2ndpass_ocr_threshold",
    "graph_2ndpass_umeyama_enabled",
    "ocr_2passes",
    "ocr_2ndpass_threshold",
    "ocr_patch_antialias",
    "ocr_tunning_apply_patterns",
    "ocr_tunning_apply_whitelist",
    "ocr_tunning_apply_blacklist",
    "magsac_sigma",
    "magsac_max_iters",
    "magsac_resampler",
    "tps_enabled",
    "tps_speed",
    "tps_cost",
    "stn_enabled",
    "detect_threshold",
    "text_segmentation_type",
    "assets_folder",
    "license_token_file",
    "license_token_data",
    "license_host_type",
    "license_usbserial",
];

/// Reasons a configuration document is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("configuration must be a JSON object")]
    NotAnObject,

    #[error("missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("key '{key}' must be a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("key '{key}' value {value} is outside {range}")]
    OutOfRange {
        key: String,
        value: String,
        range: String,
    },

    #[error("key '{key}' has unsupported value '{value}'")]
    UnknownVariant { key: String, value: String },

    #[error("cannot read license token file '{path}': {reason}")]
    UnreadableTokenFile { path: String, reason: String },
}

// ============================================================================
// Option enums
// ============================================================================

/// Verbosity requested by `debug_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Verbose,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl DebugLevel {
    /// `tracing` filter directive for this level.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            DebugLevel::Verbose => "trace",
            DebugLevel::Info => "info",
            DebugLevel::Warn => "warn",
            DebugLevel::Error | DebugLevel::Fatal => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenVinoActivation {
    #[default]
    Auto,
    On,
    Off,
}

/// Accelerator backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpenVinoDevice {
    #[default]
    Cpu,
    Gpu,
    Myriad,
    Hddl,
    Fpga,
}

/// Processing graph topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    #[default]
    Dense,
    Sparse,
}

/// Sampling strategy of the robust homography estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagsacResampler {
    #[default]
    Uniform,
    Prosac,
    Napsac,
    ProgressiveNapsac,
}

/// Cost metric of the thin-plate-spline warp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TpsCost {
    L1,
    #[default]
    L2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSegmentation {
    #[default]
    Watershed,
    Contours,
}

/// How a license is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseHostType {
    AwsInstance,
    AwsByol,
    AzureInstance,
    AzureByol,
}

impl LicenseHostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseHostType::AwsInstance => "aws-instance",
            LicenseHostType::AwsByol => "aws-byol",
            LicenseHostType::AzureInstance => "azure-instance",
            LicenseHostType::AzureByol => "azure-byol",
        }
    }
}

// ============================================================================
// Typed configuration
// ============================================================================

/// Typed engine configuration with documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KycConfig {
    pub debug_level: DebugLevel,
    pub debug_write_input_image_enabled: bool,
    pub debug_internal_data_path: String,

    pub gpu_ctrl_memory_enabled: bool,
    /// Worker threads, `-1` for one per available core
    pub num_threads: i32,
    /// Latency ceiling in milliseconds, `-1` for unbounded
    pub max_latency: i32,
    /// Batch ceiling, `-1` for automatic
    pub max_batchsize: i32,
    pub asm_enabled: bool,
    pub intrin_enabled: bool,

    pub openvino_activation: OpenVinoActivation,
    pub openvino_device: OpenVinoDevice,

    pub graph_type: GraphType,
    pub graph_2passes_enabled: bool,
    pub graph_2ndpass_ocr_threshold: f64,
    pub graph_2ndpass_umeyama_enabled: bool,

    pub ocr_2passes: bool,
    pub ocr_2ndpass_threshold: f64,
    pub ocr_patch_antialias: bool,
    pub ocr_tunning_apply_patterns: bool,
    pub ocr_tunning_apply_whitelist: bool,
    pub ocr_tunning_apply_blacklist: bool,

    pub magsac_sigma: f64,
    pub magsac_max_iters: i32,
    pub magsac_resampler: MagsacResampler,

    pub tps_enabled: bool,
    pub tps_speed: i32,
    pub tps_cost: TpsCost,

    pub stn_enabled: bool,

    /// Minimum confidence for a target to be reported (0.0-1.0)
    pub detect_threshold: f64,

    pub text_segmentation_type: TextSegmentation,

    /// Folder holding models and configuration files (required)
    pub assets_folder: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_token_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_token_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_host_type: Option<LicenseHostType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_usbserial: Option<String>,
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            debug_level: DebugLevel::Info,
            debug_write_input_image_enabled: false,
            debug_internal_data_path: ".".to_string(),
            gpu_ctrl_memory_enabled: false,
            num_threads: AUTO,
            max_latency: AUTO,
            max_batchsize: AUTO,
            asm_enabled: true,
            intrin_enabled: true,
            openvino_activation: OpenVinoActivation::Auto,
            openvino_device: OpenVinoDevice::Cpu,
            graph_type: GraphType::Dense,
            graph_2passes_enabled: true,
            graph_2ndpass_ocr_threshold: 0.9,
            graph_2ndpass_umeyama_enabled: true,
            ocr_2passes: true,
            ocr_2ndpass_threshold: 0.9,
            ocr_patch_antialias: true,
            ocr_tunning_apply_patterns: true,
            ocr_tunning_apply_whitelist: true,
            ocr_tunning_apply_blacklist: true,
            magsac_sigma: 4.0,
            magsac_max_iters: 2000,
            magsac_resampler: MagsacResampler::Uniform,
            tps_enabled: true,
            tps_speed: 1,
            tps_cost: TpsCost::L2,
            stn_enabled: true,
            detect_threshold: 0.3,
            text_segmentation_type: TextSegmentation::Watershed,
            assets_folder: String::new(),
            license_token_file: None,
            license_token_data: None,
            license_host_type: None,
            license_usbserial: None,
        }
    }
}

impl KycConfig {
    /// Defaults with the given assets folder.
    pub fn with_assets(assets_folder: impl Into<String>) -> Self {
        Self {
            assets_folder: assets_folder.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject);
        };
        let fields = Fields { map };
        let defaults = Self::default();

        let assets_folder = fields
            .string("assets_folder")?
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingKey("assets_folder"))?;

        let config = Self {
            debug_level: fields.variant("debug_level", defaults.debug_level)?,
            debug_write_input_image_enabled: fields.bool(
                "debug_write_input_image_enabled",
                defaults.debug_write_input_image_enabled,
            )?,
            debug_internal_data_path: fields
                .string("debug_internal_data_path")?
                .unwrap_or(defaults.debug_internal_data_path),

            gpu_ctrl_memory_enabled: fields
                .bool("gpu_ctrl_memory_enabled", defaults.gpu_ctrl_memory_enabled)?,
            num_threads: fields.int("num_threads", defaults.num_threads, IntRange::auto_or(1, 256))?,
            max_latency: fields.int("max_latency", defaults.max_latency, IntRange::auto_or(1, 60_000))?,
            max_batchsize: fields.int(
                "max_batchsize",
                defaults.max_batchsize,
                IntRange::auto_or(1, 1024),
            )?,
            asm_enabled: fields.bool("asm_enabled", defaults.asm_enabled)?,
            intrin_enabled: fields.bool("intrin_enabled", defaults.intrin_enabled)?,

            openvino_activation: fields
                .variant("openvino_activation", defaults.openvino_activation)?,
            openvino_device: fields.variant("openvino_device", defaults.openvino_device)?,

            graph_type: fields.variant("graph_type", defaults.graph_type)?,
            graph_2passes_enabled: fields
                .bool("graph_2passes_enabled", defaults.graph_2passes_enabled)?,
            graph_2ndpass_ocr_threshold: fields.float(
                "graph_2ndpass_ocr_threshold",
                defaults.graph_2ndpass_ocr_threshold,
                FloatRange::unit(),
            )?,
            graph_2ndpass_umeyama_enabled: fields.bool(
                "graph_2ndpass_umeyama_enabled",
                defaults.graph_2ndpass_umeyama_enabled,
            )?,

            ocr_2passes: fields.bool("ocr_2passes", defaults.ocr_2passes)?,
            ocr_2ndpass_threshold: fields.float(
                "ocr_2ndpass_threshold",
                defaults.ocr_2ndpass_threshold,
                FloatRange::unit(),
            )?,
            ocr_patch_antialias: fields.bool("ocr_patch_antialias", defaults.ocr_patch_antialias)?,
            ocr_tunning_apply_patterns: fields
                .bool("ocr_tunning_apply_patterns", defaults.ocr_tunning_apply_patterns)?,
            ocr_tunning_apply_whitelist: fields
                .bool("ocr_tunning_apply_whitelist", defaults.ocr_tunning_apply_whitelist)?,
            ocr_tunning_apply_blacklist: fields
                .bool("ocr_tunning_apply_blacklist", defaults.ocr_tunning_apply_blacklist)?,

            magsac_sigma: fields.float(
                "magsac_sigma",
                defaults.magsac_sigma,
                FloatRange {
                    min: 0.0,
                    max: 100.0,
                    min_exclusive: true,
                },
            )?,
            magsac_max_iters: fields.int(
                "magsac_max_iters",
                defaults.magsac_max_iters,
                IntRange::new(1, 100_000),
            )?,
            magsac_resampler: fields.variant("magsac_resampler", defaults.magsac_resampler)?,

            tps_enabled: fields.bool("tps_enabled", defaults.tps_enabled)?,
            tps_speed: fields.int("tps_speed", defaults.tps_speed, IntRange::new(0, 3))?,
            tps_cost: fields.variant("tps_cost", defaults.tps_cost)?,

            stn_enabled: fields.bool("stn_enabled", defaults.stn_enabled)?,

            detect_threshold: fields.float(
                "detect_threshold",
                defaults.detect_threshold,
                FloatRange::unit(),
            )?,

            text_segmentation_type: fields
                .variant("text_segmentation_type", defaults.text_segmentation_type)?,

            assets_folder,

            license_token_file: fields.string("license_token_file")?,
            license_token_data: fields.string("license_token_data")?,
            license_host_type: fields.optional_variant("license_host_type")?,
            license_usbserial: fields.string("license_usbserial")?,
        };

        for key in map.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            debug!("Ignoring unknown configuration key '{}'", key);
        }

        Ok(config)
    }

    /// Serialize back to a flat JSON object holding every set key.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Number of worker threads to spawn.
    pub fn resolved_threads(&self) -> usize {
        if self.num_threads == AUTO {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_threads.max(1) as usize
        }
    }

    pub fn debug_dump_dir(&self) -> Option<PathBuf> {
        self.debug_write_input_image_enabled
            .then(|| PathBuf::from(&self.debug_internal_data_path))
    }

    /// License token, inline data taking precedence over the token file.
    ///
    /// `Ok(None)` means trial mode.
    pub fn load_license_token(&self) -> Result<Option<String>, ConfigError> {
        if let Some(data) = self.license_token_data.as_ref().filter(|d| !d.is_empty()) {
            return Ok(Some(data.trim().to_string()));
        }
        match self.license_token_file.as_ref().filter(|p| !p.is_empty()) {
            Some(path) => std::fs::read_to_string(path)
                .map(|token| Some(token.trim().to_string()))
                .map_err(|e| ConfigError::UnreadableTokenFile {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Field readers
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct IntRange {
    min: i64,
    max: i64,
    allow_auto: bool,
}

impl IntRange {
    fn new(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            allow_auto: false,
        }
    }

    fn auto_or(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            allow_auto: true,
        }
    }

    fn contains(&self, v: i64) -> bool {
        (self.allow_auto && v == AUTO as i64) || (self.min..=self.max).contains(&v)
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allow_auto {
            write!(f, "-1 or [{}, {}]", self.min, self.max)
        } else {
            write!(f, "[{}, {}]", self.min, self.max)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatRange {
    min: f64,
    max: f64,
    min_exclusive: bool,
}

impl FloatRange {
    fn unit() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            min_exclusive: false,
        }
    }

    fn contains(&self, v: f64) -> bool {
        let above = if self.min_exclusive {
            v > self.min
        } else {
            v >= self.min
        };
        above && v <= self.max
    }
}

impl fmt::Display for FloatRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.min_exclusive { '(' } else { '[' };
        write!(f, "{}{}, {}]", open, self.min, self.max)
    }
}

/// Typed accessors over the raw JSON object. `null` reads as absent.
struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(mismatch(key, "boolean")),
        }
    }

    fn int(&self, key: &str, default: i32, range: IntRange) -> Result<i32, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        let v = value.as_i64().ok_or_else(|| mismatch(key, "integer"))?;
        if !range.contains(v) {
            return Err(ConfigError::OutOfRange {
                key: key.to_string(),
                value: v.to_string(),
                range: range.to_string(),
            });
        }
        // Every range fits in i32
        Ok(v as i32)
    }

    fn float(&self, key: &str, default: f64, range: FloatRange) -> Result<f64, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        let v = value.as_f64().ok_or_else(|| mismatch(key, "number"))?;
        if !range.contains(v) {
            return Err(ConfigError::OutOfRange {
                key: key.to_string(),
                value: v.to_string(),
                range: range.to_string(),
            });
        }
        Ok(v)
    }

    fn string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(mismatch(key, "string")),
        }
    }

    fn variant<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional_variant(key)?.unwrap_or(default))
    }

    fn optional_variant<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => serde_json::from_value(Value::String(s.clone()))
                .map(Some)
                .map_err(|_| ConfigError::UnknownVariant {
                    key: key.to_string(),
                    value: s.clone(),
                }),
            Some(_) => Err(mismatch(key, "string")),
        }
    }
}

fn mismatch(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::TypeMismatch {
        key: key.to_string(),
        expected,
    }
}
