//! Vendor identification from ATA model and revision strings.
//!
//! Drives rarely report a usable vendor, so the vendor is inferred from the
//! model name using ordered first-match tables of glob patterns.

/// One row of a vendor table: glob pattern (upper case), PCI vendor id,
/// display name.
pub type VendorEntry = (&'static str, u16, &'static str);

/// Model names that start with the vendor. The matched prefix is removed
/// from the reported name.
pub static VENDOR_NAME_PREFIXES: &[VendorEntry] = &[
    ("ADATA*", 0x1cc1, "ADATA"),
    ("APACER*", 0x0000, "Apacer"),
    ("APPLE*", 0x106b, "Apple"),
    ("CORSAIR*", 0x1987, "Corsair"),
    ("CRUCIAL*", 0xc0a9, "Crucial"),
    ("FUJITSU*", 0x10cf, "Fujitsu"),
    ("GIGABYTE*", 0x1458, "Gigabyte"),
    ("HGST*", 0x101c, "Western Digital"),
    ("HITACHI*", 0x101c, "Western Digital"),
    ("HITACHI*", 0x1054, "Hitachi"),
    ("HP SSD*", 0x103c, "HP"),
    ("INTEL*", 0x8086, "Intel"),
    ("KINGSPEC*", 0x0000, "KingSpec"),
    ("KINGSTON*", 0x2646, "Kingston"),
    ("LITEON*", 0x14a4, "LITE-ON"),
    ("MAXTOR*", 0x115f, "Maxtor"),
    ("MICRON*", 0x1344, "Micron"),
    ("OCZ*", 0x1179, "Toshiba"),
    ("PNY*", 0x196e, "PNY"),
    // identifies as Red Hat
    ("QEMU*", 0x1b36, "QEMU"),
    ("SAMSUNG*", 0x144d, "Samsung"),
    ("SANDISK*", 0x15b7, "SanDisk"),
    ("SEAGATE*", 0x1bb1, "Seagate"),
    ("SK HYNIX*", 0x1c5c, "SK hynix"),
    ("SUPERMICRO*", 0x15d9, "SuperMicro"),
    ("TOSHIBA*", 0x1179, "Toshiba"),
    ("WDC*", 0x101c, "Western Digital"),
];

/// Model-number patterns for drives that omit the vendor name.
pub static VENDOR_MODEL_PATTERNS: &[VendorEntry] = &[
    ("001-*", 0x1bb1, "Seagate"),
    ("726060*", 0x101c, "Western Digital"),
    ("CT*", 0xc0a9, "Crucial"),
    ("DT0*", 0x1179, "Toshiba"),
    ("EK0*", 0x1590, "HPE"),
    ("EZEX*", 0x101c, "Western Digital"),
    ("GB0*", 0x1590, "HPE"),
    ("GOODRAM*", 0x1987, "Phison"),
    ("H??54*", 0x101c, "Western Digital"),
    ("H??72?0*", 0x101c, "Western Digital"),
    ("HDWG*", 0x1179, "Toshiba"),
    ("M?0??CA*", 0x1179, "Toshiba"),
    ("M4-CT*", 0xc0a9, "Crucial"),
    ("MA*", 0x10cf, "Fujitsu"),
    ("MB*", 0x10cf, "Fujitsu"),
    ("MK0*", 0x1590, "HPE"),
    ("MTFDDAK*", 0x1344, "Micron"),
    ("NIM*", 0x0000, "Nimbus"),
    ("SATADOM*", 0x0000, "Innodisk"),
    ("SSD 860*", 0x144d, "Samsung"),
    ("SSDPR*", 0x1987, "Phison"),
    ("SSDSC?K*", 0x8086, "Intel"),
    ("ST*", 0x1bb1, "Seagate"),
    ("TEAM*", 0x0000, "Team Group"),
    ("TS*", 0x8564, "Transcend"),
    ("VK0*", 0x1590, "HPE"),
    ("WD*", 0x101c, "Western Digital"),
];

/// Firmware revision patterns, consulted last.
pub static VENDOR_REVISION_PATTERNS: &[VendorEntry] = &[
    ("CS2111*", 0x196e, "PNY"),
    ("S?FM*", 0x1987, "Phison"),
];

/// Glob match supporting `*` (any run, including empty) and `?` (exactly
/// one character). The whole of `text` must match.
pub fn pattern_match_simple(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last '*' and the text index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, from)) => {
                    p = star + 1;
                    t = from + 1;
                    backtrack = Some((star, from + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// First row of `table` whose pattern matches `text`.
pub fn lookup(table: &'static [VendorEntry], text: &str) -> Option<&'static VendorEntry> {
    table.iter().find(|(pattern, _, _)| pattern_match_simple(pattern, text))
}

/// Result of vendor inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorMatch {
    pub vendor: Option<&'static str>,
    /// PCI vendor id, 0 when unknown.
    pub vendor_id: u16,
    /// Model name with any vendor prefix and leading junk removed.
    pub name: String,
}

/// Infer the vendor from a model name and, failing that, the firmware
/// revision. Later tables are only consulted while no vendor id is known.
pub fn identify_vendor(model: &str, revision: Option<&str>) -> VendorMatch {
    let model_up = model.to_ascii_uppercase();
    let mut vendor = None;
    let mut vendor_id = 0;
    let mut name = model;

    if let Some((pattern, vid, label)) = lookup(VENDOR_NAME_PREFIXES, &model_up) {
        let prefix_len = pattern.len() - 1;
        name = model.get(prefix_len..).unwrap_or("");
        vendor = Some(*label);
        vendor_id = *vid;
    }

    if vendor_id == 0
        && let Some((_, vid, label)) = lookup(VENDOR_MODEL_PATTERNS, &model_up)
    {
        vendor = Some(*label);
        vendor_id = *vid;
    }

    if vendor_id == 0
        && let Some(revision) = revision
        && let Some((_, vid, label)) =
            lookup(VENDOR_REVISION_PATTERNS, &revision.to_ascii_uppercase())
    {
        vendor = Some(*label);
        vendor_id = *vid;
    }

    VendorMatch {
        vendor,
        vendor_id,
        name: name.trim_start_matches([' ', '_', '-']).to_string(),
    }
}
