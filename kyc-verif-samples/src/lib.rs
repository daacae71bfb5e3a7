//! Helpers shared by the sample binaries.

use std::fmt::Display;
use std::path::Path;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use kyc_verif::KycResult;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::error;

/// How long `verify` waits for its parallel delivery.
pub const SINGLE_DELIVERY_TIMEOUT_MS: u64 = 1500;
/// How long `benchmark` waits for all parallel deliveries.
pub const BATCH_DELIVERY_TIMEOUT_MS: u64 = 15_000;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is empty")]
    EmptyFile(String),

    #[error("failed to decode '{path}': {reason}")]
    Decode { path: String, reason: String },

    #[error("{operation} failed: code {code}, {phrase}")]
    Engine {
        operation: &'static str,
        code: i32,
        phrase: String,
    },

    #[error("{0}")]
    Delivery(String),
}

/// Turn a failed engine result into an error.
pub fn check(operation: &'static str, result: KycResult) -> Result<KycResult, SampleError> {
    if result.is_ok() {
        Ok(result)
    } else {
        Err(SampleError::Engine {
            operation,
            code: result.code(),
            phrase: result.phrase().to_string(),
        })
    }
}

/// Options shared by `verify` and `benchmark` that end up in the config.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions<'a> {
    pub assets_folder: &'a str,
    pub vino_activation: &'a str,
    pub token_file: Option<&'a str>,
    pub token_data: Option<&'a str>,
    pub gpu_ctrl_memory: Option<bool>,
}

/// Base configuration used by the samples.
pub fn base_config() -> Map<String, Value> {
    let value = json!({
        "debug_level": "info",
        "debug_write_input_image_enabled": false,
        "debug_internal_data_path": ".",

        "gpu_ctrl_memory_enabled": false,
        "num_threads": -1,
        "max_latency": -1,
        "max_batchsize": -1,
        "asm_enabled": true,
        "intrin_enabled": true,

        "openvino_device": "CPU",

        "graph_type": "dense",
        "graph_2passes_enabled": true,
        "graph_2ndpass_ocr_threshold": 0.9,
        "graph_2ndpass_umeyama_enabled": true,

        "ocr_2passes": true,
        "ocr_2ndpass_threshold": 0.9,
        "ocr_patch_antialias": true,
        "ocr_tunning_apply_patterns": true,
        "ocr_tunning_apply_whitelist": true,
        "ocr_tunning_apply_blacklist": true,

        "magsac_sigma": 4.0,
        "magsac_max_iters": 2000,
        "magsac_resampler": "uniform",

        "tps_enabled": true,
        "tps_speed": 1,
        "tps_cost": "l2",

        "stn_enabled": true,

        "detect_threshold": 0.3,

        "text_segmentation_type": "watershed"
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Base configuration plus the command-line overrides, as JSON text.
pub fn build_config(options: &ConfigOptions<'_>) -> String {
    let mut config = base_config();
    if !options.assets_folder.is_empty() {
        config.insert(
            "assets_folder".into(),
            options.assets_folder.replace('\\', "/").into(),
        );
    }
    if !options.vino_activation.is_empty() {
        config.insert("openvino_activation".into(), options.vino_activation.into());
    }
    if let Some(file) = options.token_file.filter(|f| !f.is_empty()) {
        config.insert("license_token_file".into(), file.replace('\\', "/").into());
    }
    if let Some(data) = options.token_data.filter(|d| !d.is_empty()) {
        config.insert("license_token_data".into(), data.into());
    }
    if let Some(enabled) = options.gpu_ctrl_memory {
        config.insert("gpu_ctrl_memory_enabled".into(), enabled.into());
    }
    Value::Object(config).to_string()
}

/// Read a whole input file, rejecting empty ones.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, SampleError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| SampleError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(SampleError::EmptyFile(path.display().to_string()));
    }
    Ok(bytes)
}

/// `{}` when a result carries no body, for display.
pub fn display_json(result: &KycResult) -> &str {
    if result.json().is_empty() {
        "{}"
    } else {
        result.json()
    }
}

/// Parse arguments, printing usage and exiting with -1 on failure.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print().ok();
            process::exit(0);
        }
        Err(e) => {
            e.print().ok();
            process::exit(-1);
        }
    }
}

/// Log `err` and terminate with -1.
pub fn exit_with(err: impl Display) -> ! {
    error!("{}", err);
    process::exit(-1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyc_verif::KycConfig;

    #[test]
    fn test_base_config_is_valid() {
        let mut config = base_config();
        config.insert("assets_folder".into(), "./assets".into());
        let parsed = KycConfig::from_value(&Value::Object(config)).unwrap();
        assert_eq!(parsed.num_threads, -1);
        assert_eq!(parsed.detect_threshold, 0.3);
    }

    #[test]
    fn test_build_config_overrides() {
        let json = build_config(&ConfigOptions {
            assets_folder: "C:\\models",
            vino_activation: "off",
            token_file: Some(""),
            token_data: Some("TOKEN"),
            gpu_ctrl_memory: Some(true),
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["assets_folder"], "C:/models");
        assert_eq!(value["openvino_activation"], "off");
        assert_eq!(value["license_token_data"], "TOKEN");
        assert_eq!(value["gpu_ctrl_memory_enabled"], true);
        assert!(value.get("license_token_file").is_none());

        assert!(KycConfig::from_json(&json).is_ok());
    }

    #[test]
    fn test_read_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.jpg");
        std::fs::write(&empty, b"").unwrap();

        assert!(matches!(read_file(&empty), Err(SampleError::EmptyFile(_))));
        assert!(matches!(
            read_file(dir.path().join("missing.jpg")),
            Err(SampleError::Read { .. })
        ));
    }

    #[test]
    fn test_check_maps_failures() {
        assert!(check("init", KycResult::bodyless_ok()).is_ok());
        let err = check("process", KycResult::bodyless(-4, "bad stride")).unwrap_err();
        assert_eq!(err.to_string(), "process failed: code -4, bad stride");
    }
}
