//! Machine identification from DMI sysfs attributes

use std::path::Path;

use tracing::warn;

use crate::data::persistence::read_text_file;
use crate::data::MachineIdentity;
use crate::error::Result;

const SYS_VENDOR: &str = "sys_vendor";
const PRODUCT_VERSION: &str = "product_version";
const PRODUCT_NAME: &str = "product_name";

fn read_attribute(dmi_dir: &Path, name: &str) -> Result<String> {
    Ok(read_text_file(&dmi_dir.join(name))?.trim().to_string())
}

/// Read vendor, product version and product name
///
/// On ThinkPads `product_version` holds the marketing name
/// ("ThinkPad X1 Carbon") and `product_name` the machine type ("20AB").
fn read_machine_identity(dmi_dir: &Path) -> Result<MachineIdentity> {
    Ok(MachineIdentity {
        vendor: read_attribute(dmi_dir, SYS_VENDOR)?,
        product_version: read_attribute(dmi_dir, PRODUCT_VERSION)?,
        product_name: read_attribute(dmi_dir, PRODUCT_NAME)?,
    })
}

/// Read the machine identity; an unreadable DMI tree yields an
/// empty identity so that only the generic profile applies
pub fn detect_machine_identity(dmi_dir: &Path) -> MachineIdentity {
    read_machine_identity(dmi_dir).unwrap_or_else(|e| {
        warn!("Unable to determine the system model: {}", e);
        MachineIdentity::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_identity() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("sys_vendor"), "LENOVO\n").unwrap();
        fs::write(dir.path().join("product_version"), "ThinkPad X1\n").unwrap();
        fs::write(dir.path().join("product_name"), "20AB\n").unwrap();

        let identity = read_machine_identity(dir.path()).unwrap();
        assert_eq!(identity.vendor, "LENOVO");
        assert_eq!(identity.product_id(), "lenovo_20ab");
        assert_eq!(identity.product_name_slug(), "lenovo_thinkpad_x1");
    }

    #[test]
    fn test_missing_dmi_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("sys_vendor"), "LENOVO\n").unwrap();

        assert!(read_machine_identity(dir.path()).is_err());
        let identity = detect_machine_identity(dir.path());
        assert!(identity.is_unknown());
    }
}
