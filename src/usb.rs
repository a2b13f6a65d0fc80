// ============================================
// usb.rs - USB setup media (unattend.xml)
// ============================================
//
// The USB page collects:
//   - an ISO image and a target removable drive (both REQUIRED)
//   - product key, computer name, language (optional, with defaults)
//   - partition scheme and file system (shown in the log only)
//
// and writes an unattend.xml to the user's Desktop. The file is what
// Windows Setup reads to skip the OOBE questions.
//
// NOTE: this does not format the stick or copy the ISO. It's only the
// answer file.
// ============================================

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use sysinfo::Disks;
use tracing::{error, info, warn};

/// Edition-neutral placeholder used when no key is entered
pub const DEFAULT_PRODUCT_KEY: &str = "XXXXX-XXXXX-XXXXX-XXXXX-XXXXX";
pub const DEFAULT_PC_NAME: &str = "My-PC";
pub const DEFAULT_LANG: &str = "ru-RU";

const UNATTEND_FILE_NAME: &str = "unattend.xml";

// ============================================
// PARAMETERS
// ============================================

/// Everything the USB page sends to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbBuildParams {
    pub iso_path: Option<PathBuf>,
    pub drive: Option<String>,
    pub product_key: Option<String>,
    pub pc_name: Option<String>,
    pub lang: Option<String>,
    pub partition_scheme: String,
    pub file_system: String,
}

impl Default for UsbBuildParams {
    fn default() -> Self {
        Self {
            iso_path: None,
            drive: None,
            product_key: None,
            pc_name: None,
            lang: None,
            partition_scheme: "GPT".to_string(),
            file_system: "NTFS".to_string(),
        }
    }
}

impl UsbBuildParams {
    fn product_key(&self) -> &str {
        non_empty(&self.product_key).unwrap_or(DEFAULT_PRODUCT_KEY)
    }

    fn pc_name(&self) -> &str {
        non_empty(&self.pc_name).unwrap_or(DEFAULT_PC_NAME)
    }

    fn lang(&self) -> &str {
        non_empty(&self.lang).unwrap_or(DEFAULT_LANG)
    }

    /// One line for the USB log.
    pub fn summary(&self) -> String {
        format!(
            "iso={} drive={} scheme={} fs={} pc_name={} lang={}",
            self.iso_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string()),
            self.drive.as_deref().unwrap_or("-"),
            self.partition_scheme,
            self.file_system,
            self.pc_name(),
            self.lang(),
        )
    }
}

/// Treat "" and whitespace like "not given".
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================
// UNATTEND.XML GENERATION
// ============================================

/// Build the unattend.xml text.
///
/// Passes written:
///   windowsPE   - locale for setup + product key, EULA accepted
///   oobeSystem  - hide OOBE pages, local Admin account, computer name
pub fn generate_unattend(params: &UsbBuildParams) -> String {
    let lang = escape_xml(params.lang());
    let key = escape_xml(params.product_key());
    let pc_name = escape_xml(params.pc_name());
    let component_attrs = r#"processorArchitecture="amd64" publicKeyToken="31bf3856ad364e35" language="neutral" versionScope="nonSxS" xmlns:wcm="http://schemas.microsoft.com/WMIConfig/2002/State" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#;

    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push('\n');
    xml.push_str(r#"<unattend xmlns="urn:schemas-microsoft-com:unattend">"#);
    xml.push('\n');

    // ============================================
    // PASS 1: windowsPE
    // ============================================
    xml.push_str("    <settings pass=\"windowsPE\">\n");
    xml.push_str(&format!(
        "        <component name=\"Microsoft-Windows-International-Core-WinPE\" {}>\n",
        component_attrs
    ));
    xml.push_str(&format!("            <SetupUILanguage>\n                <UILanguage>{}</UILanguage>\n            </SetupUILanguage>\n", lang));
    xml.push_str(&format!("            <InputLocale>{}</InputLocale>\n", lang));
    xml.push_str(&format!("            <SystemLocale>{}</SystemLocale>\n", lang));
    xml.push_str(&format!("            <UserLocale>{}</UserLocale>\n", lang));
    xml.push_str("        </component>\n");

    xml.push_str(&format!("        <component name=\"Microsoft-Windows-Setup\" {}>\n", component_attrs));
    xml.push_str("            <UserData>\n");
    xml.push_str(&format!("                <ProductKey>\n                    <Key>{}</Key>\n                </ProductKey>\n", key));
    xml.push_str("                <AcceptEula>true</AcceptEula>\n");
    xml.push_str("                <FullName>User</FullName>\n");
    xml.push_str("                <Organization>WinPrep</Organization>\n");
    xml.push_str("            </UserData>\n");
    xml.push_str("        </component>\n");
    xml.push_str("    </settings>\n");

    // ============================================
    // PASS 2: oobeSystem
    // ============================================
    xml.push_str("    <settings pass=\"oobeSystem\">\n");
    xml.push_str(&format!("        <component name=\"Microsoft-Windows-Shell-Setup\" {}>\n", component_attrs));
    xml.push_str("            <OOBE>\n");
    xml.push_str("                <HideEULAPage>true</HideEULAPage>\n");
    xml.push_str("                <HideWirelessSetupInOOBE>true</HideWirelessSetupInOOBE>\n");
    xml.push_str("                <NetworkLocation>Work</NetworkLocation>\n");
    xml.push_str("                <ProtectYourPC>1</ProtectYourPC>\n");
    xml.push_str("            </OOBE>\n");
    xml.push_str("            <UserAccounts>\n");
    xml.push_str("                <LocalAccounts>\n");
    xml.push_str("                    <LocalAccount wcm:action=\"add\">\n");
    xml.push_str("                        <Password>\n");
    xml.push_str("                            <Value></Value>\n");
    xml.push_str("                            <PlainText>true</PlainText>\n");
    xml.push_str("                        </Password>\n");
    xml.push_str("                        <Name>Admin</Name>\n");
    xml.push_str("                        <Group>Administrators</Group>\n");
    xml.push_str("                    </LocalAccount>\n");
    xml.push_str("                </LocalAccounts>\n");
    xml.push_str("            </UserAccounts>\n");
    xml.push_str(&format!("            <ComputerName>{}</ComputerName>\n", pc_name));
    xml.push_str("        </component>\n");
    xml.push_str("    </settings>\n");
    xml.push_str("</unattend>\n");

    xml
}

/// Escape special XML characters in a string.
/// Replaces: & < > " '
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ============================================
// BUILD
// ============================================

/// `%USERPROFILE%\Desktop`. Fails if USERPROFILE isn't set.
pub fn desktop_dir() -> Result<PathBuf> {
    let profile = std::env::var_os("USERPROFILE").context("USERPROFILE is not set")?;
    Ok(PathBuf::from(profile).join("Desktop"))
}

/// Check preconditions, then write unattend.xml into `output_dir`.
///
/// Returns the written path. Missing ISO or drive fails BEFORE anything
/// touches the disk.
pub fn write_unattend(params: &UsbBuildParams, output_dir: &std::path::Path) -> Result<PathBuf> {
    if params.iso_path.is_none() {
        anyhow::bail!("No ISO image selected");
    }
    if non_empty(&params.drive).is_none() {
        anyhow::bail!("No target drive selected");
    }

    let path = output_dir.join(UNATTEND_FILE_NAME);
    fs::write(&path, generate_unattend(params))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Build the USB answer file on the Desktop. `false` on any failure.
pub fn build_usb(params: &UsbBuildParams) -> bool {
    info!("USB build requested: {}", params.summary());

    let result = desktop_dir().and_then(|desktop| write_unattend(params, &desktop));
    match result {
        Ok(path) => {
            info!("unattend.xml written to {}", path.display());
            true
        }
        Err(e) => {
            error!("USB build failed: {:#}", e);
            false
        }
    }
}

// ============================================
// DRIVE DETECTION
// ============================================

/// A removable volume the user can pick as target.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovableDrive {
    pub mount: String,
    pub total_gb: f64,
}

impl RemovableDrive {
    /// e.g. "E:\ (14.9 GB)"
    pub fn display_string(&self) -> String {
        format!("{} ({:.1} GB)", self.mount, self.total_gb)
    }

    /// Drive part of a combo box label ("E:\ (14.9 GB)" -> "E:\").
    pub fn mount_from_label(label: &str) -> Option<String> {
        label.split(" (").next().map(str::trim).filter(|m| !m.is_empty()).map(str::to_string)
    }
}

/// List removable volumes (USB sticks, SD cards).
pub fn list_removable_drives() -> Vec<RemovableDrive> {
    let drives: Vec<RemovableDrive> = Disks::new_with_refreshed_list()
        .iter()
        .filter(|d| d.is_removable())
        .map(|d| RemovableDrive {
            mount: d.mount_point().to_string_lossy().into_owned(),
            total_gb: d.total_space() as f64 / (1024.0 * 1024.0 * 1024.0),
        })
        .collect();

    if drives.is_empty() {
        warn!("No removable drives found");
    }
    drives
}

/// Open the native ISO picker.
pub fn pick_iso_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Select Windows ISO")
        .add_filter("ISO image", &["iso"])
        .pick_file()
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_params() -> UsbBuildParams {
        UsbBuildParams {
            iso_path: Some(PathBuf::from(r"C:\isos\Win11.iso")),
            drive: Some(r"E:\".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_fill_empty_fields() {
        let xml = generate_unattend(&UsbBuildParams {
            product_key: Some("   ".to_string()),
            ..ready_params()
        });
        assert!(xml.contains(&format!("<Key>{}</Key>", DEFAULT_PRODUCT_KEY)));
        assert!(xml.contains("<ComputerName>My-PC</ComputerName>"));
        assert!(xml.contains("<UILanguage>ru-RU</UILanguage>"));
    }

    #[test]
    fn test_user_values_are_escaped() {
        let xml = generate_unattend(&UsbBuildParams {
            pc_name: Some("Lab<1>&Co".to_string()),
            lang: Some("en-US".to_string()),
            ..ready_params()
        });
        assert!(xml.contains("<ComputerName>Lab&lt;1&gt;&amp;Co</ComputerName>"));
        assert!(xml.contains("<InputLocale>en-US</InputLocale>"));
    }

    #[test]
    fn test_both_passes_present() {
        let xml = generate_unattend(&ready_params());
        assert!(xml.contains(r#"<settings pass="windowsPE">"#));
        assert!(xml.contains(r#"<settings pass="oobeSystem">"#));
        assert!(xml.trim_end().ends_with("</unattend>"));
    }

    #[test]
    fn test_missing_iso_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let params = UsbBuildParams { iso_path: None, ..ready_params() };

        assert!(write_unattend(&params, dir.path()).is_err());
        assert!(!dir.path().join(UNATTEND_FILE_NAME).exists());
    }

    #[test]
    fn test_missing_drive_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let params = UsbBuildParams { drive: Some(String::new()), ..ready_params() };

        assert!(write_unattend(&params, dir.path()).is_err());
        assert!(!dir.path().join(UNATTEND_FILE_NAME).exists());
    }

    #[test]
    fn test_writes_unattend_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unattend(&ready_params(), dir.path()).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("<?xml"));
    }

    #[test]
    fn test_build_usb_rejects_missing_inputs() {
        assert!(!build_usb(&UsbBuildParams::default()));
    }

    #[test]
    fn test_mount_from_label() {
        assert_eq!(RemovableDrive::mount_from_label(r"E:\ (14.9 GB)"), Some(r"E:\".to_string()));
        assert_eq!(RemovableDrive::mount_from_label(""), None);
        let drive = RemovableDrive { mount: "/media/usb".to_string(), total_gb: 7.31 };
        assert_eq!(drive.display_string(), "/media/usb (7.3 GB)");
    }
}
