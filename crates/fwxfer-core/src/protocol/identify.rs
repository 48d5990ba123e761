//! Typed view of a parsed identify block.

use std::fmt;

/// Identity and capabilities reported by a device.
///
/// Only fields the device actually populated are `Some`; blank string
/// fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor: Option<String>,
    /// PCI vendor id (ATA) or USB vendor id (bridge); 0 when unknown.
    pub vendor_id: u16,
    pub product_id: Option<u16>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
    pub sku: Option<String>,
    /// OEM component id, e.g. `STORAGE-DELL-<id>` on Dell-owned drives.
    pub component_id: Option<String>,
    /// IEEE OUI from the world-wide name.
    pub oui: Option<u32>,
    /// Chunk size the device wants for segmented downloads.
    pub preferred_chunk_size: Option<usize>,
    pub max_image_size: Option<usize>,
    pub flash_size: Option<u64>,
    pub erase_block_size: Option<usize>,
    pub page_size: Option<usize>,
    /// Device applies the image only after a reboot.
    pub needs_reboot: bool,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.vendor.as_deref().unwrap_or("Unknown"),
            self.model.as_deref().unwrap_or("device")
        )?;
        if let Some(version) = &self.firmware_version {
            write!(f, " (firmware {})", version)?;
        }
        if let Some(serial) = &self.serial {
            write!(f, " [{}]", serial)?;
        }
        Ok(())
    }
}
