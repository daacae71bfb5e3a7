//! Runtime license key derivation.
//!
//! The key fingerprints the host: product tag, SDK version, machine
//! identity and the optional cloud host type / USB dongle serial from the
//! configuration. It is sent to the vendor to obtain a license token.

use std::fs;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::KycConfig;
use crate::logging::prefix;
use crate::result::{KycResult, CODE_OK};

const PRODUCT_TAG: &str = "kyc-verif";
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];
const KEY_GROUPS: usize = 4;
const GROUP_LEN: usize = 8;

/// Best-effort stable identity of this machine.
pub fn machine_identity() -> String {
    for path in MACHINE_ID_PATHS {
        if let Ok(id) = fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Key for this machine under `config`.
pub fn runtime_key(config: &KycConfig) -> String {
    derive_key(&machine_identity(), config)
}

/// Key for an explicit machine identity.
pub fn derive_key(machine: &str, config: &KycConfig) -> String {
    let mut hasher = Sha256::new();
    for part in [
        PRODUCT_TAG,
        crate::VERSION,
        machine,
        config.license_host_type.map(|t| t.as_str()).unwrap_or(""),
        config.license_usbserial.as_deref().unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        // Field separator so ("ab", "c") and ("a", "bc") differ
        hasher.update([0u8]);
    }
    let digest = hex::encode_upper(hasher.finalize());

    digest.as_bytes()[..KEY_GROUPS * GROUP_LEN]
        .chunks(GROUP_LEN)
        .map(|group| String::from_utf8_lossy(group).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// Wrap a key in a result: bare text when `raw`, `{"key": ...}` otherwise.
pub fn key_result(key: String, raw: bool) -> KycResult {
    debug!("{} Runtime license key derived", prefix::LICENSE);
    if raw {
        KycResult::new(CODE_OK, "OK", key, 0)
    } else {
        KycResult::new(CODE_OK, "OK", serde_json::json!({ "key": key }).to_string(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LicenseHostType;

    #[test]
    fn test_key_shape() {
        let key = derive_key("machine-a", &KycConfig::with_assets("."));
        let groups: Vec<&str> = key.split('-').collect();
        assert_eq!(groups.len(), KEY_GROUPS);
        for group in groups {
            assert_eq!(group.len(), GROUP_LEN);
            assert!(group
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn test_key_is_deterministic_and_host_bound() {
        let config = KycConfig::with_assets(".");
        assert_eq!(derive_key("machine-a", &config), derive_key("machine-a", &config));
        assert_ne!(derive_key("machine-a", &config), derive_key("machine-b", &config));
    }

    #[test]
    fn test_key_depends_on_license_fields() {
        let base = KycConfig::with_assets(".");
        let mut aws = base.clone();
        aws.license_host_type = Some(LicenseHostType::AwsInstance);
        let mut dongle = base.clone();
        dongle.license_usbserial = Some("0042".to_string());

        let keys = [
            derive_key("m", &base),
            derive_key("m", &aws),
            derive_key("m", &dongle),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[1], keys[2]);
    }

    #[test]
    fn test_key_result_modes() {
        let raw = key_result("ABCD".to_string(), true);
        assert!(raw.is_ok());
        assert_eq!(raw.json(), "ABCD");

        let wrapped = key_result("ABCD".to_string(), false);
        let value: serde_json::Value = serde_json::from_str(wrapped.json()).unwrap();
        assert_eq!(value["key"], "ABCD");
    }

    #[test]
    fn test_machine_identity_not_empty() {
        assert!(!machine_identity().is_empty());
    }
}
