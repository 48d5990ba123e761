//! On-disk update configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::XferError;
use crate::policy::TransferPolicy;
use crate::protocol::DeviceClass;
use crate::transport::UsbDescriptor;

/// Target class, transfer policy and channel for one update.
///
/// ```toml
/// [device]
/// kind = "spi-bridge"
/// max_transfer = 4096
///
/// [policy]
/// chunk_size = 256
/// requires_erase = true
///
/// [usb]
/// vendor_id = 0x05E3
/// product_id = 0x0610
/// ```
///
/// Keys missing from `[policy]` take the device class default, not the
/// generic [`TransferPolicy::default`]; the example above still verifies.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawUpdateConfig")]
pub struct UpdateConfig {
    pub device: DeviceClass,
    /// Falls back to the class default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<TransferPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb: Option<UsbDescriptor>,
}

/// On-disk shape, with `[policy]` still an untyped overlay.
#[derive(Deserialize)]
struct RawUpdateConfig {
    device: DeviceClass,
    #[serde(default)]
    policy: Option<toml::Table>,
    #[serde(default)]
    usb: Option<UsbDescriptor>,
}

impl TryFrom<RawUpdateConfig> for UpdateConfig {
    type Error = XferError;

    fn try_from(raw: RawUpdateConfig) -> Result<Self, Self::Error> {
        let policy = raw
            .policy
            .map(|overlay| overlay_policy(raw.device.default_policy(), overlay))
            .transpose()?;
        Ok(Self {
            device: raw.device,
            policy,
            usb: raw.usb,
        })
    }
}

/// Apply the keys of `overlay` on top of `base`.
fn overlay_policy(base: TransferPolicy, overlay: toml::Table) -> Result<TransferPolicy, XferError> {
    let mut merged = match toml::Value::try_from(base).map_err(invalid_policy)? {
        toml::Value::Table(table) => table,
        other => return Err(invalid_policy(format!("unexpected {}", other.type_str()))),
    };
    merged.extend(overlay);
    toml::Value::Table(merged).try_into().map_err(invalid_policy)
}

fn invalid_policy(e: impl std::fmt::Display) -> XferError {
    XferError::Config(format!("[policy]: {}", e))
}

impl UpdateConfig {
    /// A config carrying the class default policy spelled out.
    pub fn template(device: DeviceClass) -> Self {
        let policy = device.default_policy();
        Self {
            device,
            policy: Some(policy),
            usb: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UpdateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn effective_policy(&self) -> TransferPolicy {
        self.policy
            .clone()
            .unwrap_or_else(|| self.device.default_policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ata::AtaConfig;

    #[test]
    fn test_parse_documented_example() {
        let text = r#"
[device]
kind = "spi-bridge"
max_transfer = 4096

[policy]
chunk_size = 128
requires_erase = true

[usb]
vendor_id = 0x05E3
product_id = 0x0610
"#;
        let config: UpdateConfig = toml::from_str(text).unwrap();
        assert_eq!(config.device.label(), "spi-bridge");
        let policy = config.effective_policy();
        assert_eq!(policy.chunk_size, 128);
        assert!(policy.requires_erase);
        assert_eq!(policy.erase_sentinel, 0xFF);
        // unset keys come from the spi-bridge default, not the generic one
        assert!(policy.requires_verify);
        assert!(policy.activation_resets);
        assert_eq!(policy.page_size, 256);
        let usb = config.usb.unwrap();
        assert_eq!((usb.vendor_id, usb.product_id, usb.interface), (0x05E3, 0x0610, 0));
    }

    #[test]
    fn test_missing_policy_uses_class_default() {
        let config: UpdateConfig = toml::from_str("[device]\nkind = \"ata\"\n").unwrap();
        assert_eq!(config.effective_policy(), config.device.default_policy());
        assert_eq!(config.effective_policy().block_alignment, 512);
    }

    #[test]
    fn test_partial_ata_policy_keeps_alignment() {
        let text = "[device]\nkind = \"ata\"\n\n[policy]\nchunk_size = 1024\n";
        let config: UpdateConfig = toml::from_str(text).unwrap();
        let policy = config.effective_policy();
        assert_eq!(policy.chunk_size, 1024);
        assert_eq!(policy.block_alignment, 512);
        assert_eq!(policy.max_poll_attempts, 1);
    }

    #[test]
    fn test_bad_policy_value_rejected() {
        let text = "[device]\nkind = \"ata\"\n\n[policy]\nchunk_size = \"big\"\n";
        assert!(toml::from_str::<UpdateConfig>(text).is_err());
    }

    #[test]
    fn test_save_and_load_template() {
        let path = std::env::temp_dir()
            .join(format!("fwxfer-config-{}.toml", std::process::id()));
        let config = UpdateConfig::template(DeviceClass::Ata(AtaConfig::default()));
        config.save_to_file(&path).unwrap();
        let loaded = UpdateConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
