// ============================================
// catalog.rs - Installable apps and drivers
// ============================================
//
// The catalog is the static list of things the user can tick in the
// Apps and Drivers tabs. Each entry has:
//   - a display name (what the checkbox says)
//   - a winget package id (what gets passed to `winget install --id`)
//
// DEFAULTS ARE EMBEDDED:
// data/programs.toml and data/drivers.toml are compiled into the EXE,
// so the tool works when copied to a USB stick on its own. To customize
// the list, drop a file with the same name into a `catalog/` folder
// next to the EXE:
//
//   USB Drive/
//   ├── winprep.exe
//   └── catalog/
//       ├── programs.toml   (optional override)
//       └── drivers.toml    (optional override)
// ============================================

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

const DEFAULT_PROGRAMS: &str = include_str!("../data/programs.toml");
const DEFAULT_DRIVERS: &str = include_str!("../data/drivers.toml");

// ============================================
// DATA STRUCTURES
// ============================================

/// One installable item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    /// Human name shown in the UI (e.g. "VLC media player")
    #[serde(rename = "name")]
    pub display_name: String,

    /// winget identifier (e.g. "VideoLAN.VLC")
    #[serde(rename = "id")]
    pub package_id: String,
}

/// A named group of entries. Entry order is display order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<CatalogEntry>,
}

/// A full catalog (all categories of one tab).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(default, rename = "category")]
    pub categories: Vec<Category>,
}

/// Which of the two catalogs we are talking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Programs,
    Drivers,
}

impl CatalogKind {
    fn file_name(self) -> &'static str {
        match self {
            CatalogKind::Programs => "programs.toml",
            CatalogKind::Drivers => "drivers.toml",
        }
    }

    fn embedded_toml(self) -> &'static str {
        match self {
            CatalogKind::Programs => DEFAULT_PROGRAMS,
            CatalogKind::Drivers => DEFAULT_DRIVERS,
        }
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogKind::Programs => write!(f, "Apps"),
            CatalogKind::Drivers => write!(f, "Drivers"),
        }
    }
}

// ============================================
// LOADING
// ============================================

impl Catalog {
    /// Parse a catalog from TOML text and validate it.
    ///
    /// Fails if the same package id appears twice in one category
    /// (the checkbox map is keyed by id, so duplicates would collide).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let catalog: Catalog = toml::from_str(content).context("Invalid catalog TOML")?;

        for category in &catalog.categories {
            let mut seen = HashSet::new();
            for entry in &category.entries {
                if !seen.insert(entry.package_id.as_str()) {
                    bail!(
                        "Duplicate package id '{}' in category '{}'",
                        entry.package_id,
                        category.name
                    );
                }
            }
        }

        Ok(catalog)
    }

    /// The catalog compiled into the EXE.
    pub fn embedded(kind: CatalogKind) -> Result<Self> {
        Self::from_toml_str(kind.embedded_toml())
            .with_context(|| format!("Embedded {} catalog is broken", kind))
    }

    /// Load a catalog, preferring `<dir>/<kind>.toml` over the embedded default.
    ///
    /// A missing override is normal. A broken override is logged and ignored.
    pub fn load_from_dir(dir: &Path, kind: CatalogKind) -> Self {
        let override_path = dir.join(kind.file_name());
        if override_path.exists() {
            match fs::read_to_string(&override_path)
                .with_context(|| format!("Failed to read {}", override_path.display()))
                .and_then(|content| Self::from_toml_str(&content))
            {
                Ok(catalog) => {
                    info!("Using {} catalog override: {}", kind, override_path.display());
                    return catalog;
                }
                Err(e) => warn!("Ignoring {} catalog override: {:#}", kind, e),
            }
        }

        match Self::embedded(kind) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("{:#}", e);
                Catalog::default()
            }
        }
    }

    /// Iterate every entry of every category, in display order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.categories.iter().flat_map(|c| c.entries.iter())
    }

    /// Look up an entry by its exact package id.
    pub fn find(&self, package_id: &str) -> Option<&CatalogEntry> {
        self.entries().find(|e| e.package_id == package_id)
    }
}

/// Both catalogs, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    pub programs: Catalog,
    pub drivers: Catalog,
}

impl Catalogs {
    /// Load both catalogs from `catalog/` next to the EXE (or the embedded defaults).
    pub fn load() -> Self {
        let dir = crate::settings::app_directory().join("catalog");
        Self {
            programs: Catalog::load_from_dir(&dir, CatalogKind::Programs),
            drivers: Catalog::load_from_dir(&dir, CatalogKind::Drivers),
        }
    }

    pub fn get(&self, kind: CatalogKind) -> &Catalog {
        match kind {
            CatalogKind::Programs => &self.programs,
            CatalogKind::Drivers => &self.drivers,
        }
    }

    /// Lowercase package id -> display name, across both catalogs.
    ///
    /// Order follows the catalogs (programs first). If an id shows up twice,
    /// the later display name wins but the id keeps its first position.
    pub fn known_ids(&self) -> Vec<(String, String)> {
        let mut known: Vec<(String, String)> = Vec::new();
        for entry in self.programs.entries().chain(self.drivers.entries()) {
            let id = entry.package_id.to_lowercase();
            match known.iter_mut().find(|(k, _)| *k == id) {
                Some(slot) => slot.1 = entry.display_name.clone(),
                None => known.push((id, entry.display_name.clone())),
            }
        }
        known
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalogs_parse() {
        let programs = Catalog::embedded(CatalogKind::Programs).unwrap();
        let drivers = Catalog::embedded(CatalogKind::Drivers).unwrap();

        assert!(!programs.categories.is_empty());
        assert!(!drivers.categories.is_empty());
        assert!(programs.find("VideoLAN.VLC").is_some());
    }

    #[test]
    fn test_category_order_is_file_order() {
        let catalog = Catalog::from_toml_str(
            r#"
[[category]]
name = "Zeta"
entries = [ { name = "B", id = "b.b" }, { name = "A", id = "a.a" } ]

[[category]]
name = "Alpha"
entries = []
"#,
        )
        .unwrap();

        let names: Vec<&str> = catalog.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        let ids: Vec<&str> = catalog.entries().map(|e| e.package_id.as_str()).collect();
        assert_eq!(ids, vec!["b.b", "a.a"]);
    }

    #[test]
    fn test_duplicate_id_in_category_is_rejected() {
        let result = Catalog::from_toml_str(
            r#"
[[category]]
name = "Media"
entries = [ { name = "VLC", id = "VideoLAN.VLC" }, { name = "VLC again", id = "VideoLAN.VLC" } ]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_same_id_in_two_categories_is_allowed() {
        let result = Catalog::from_toml_str(
            r#"
[[category]]
name = "One"
entries = [ { name = "Git", id = "Git.Git" } ]

[[category]]
name = "Two"
entries = [ { name = "Git", id = "Git.Git" } ]
"#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_broken_override_falls_back_to_embedded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("programs.toml"), "this is [not toml").unwrap();

        let catalog = Catalog::load_from_dir(dir.path(), CatalogKind::Programs);
        assert_eq!(catalog, Catalog::embedded(CatalogKind::Programs).unwrap());
    }

    #[test]
    fn test_valid_override_replaces_embedded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("drivers.toml"),
            "[[category]]\nname = \"Only\"\nentries = [ { name = \"Thing\", id = \"Vendor.Thing\" } ]\n",
        )
        .unwrap();

        let catalog = Catalog::load_from_dir(dir.path(), CatalogKind::Drivers);
        assert_eq!(catalog.categories.len(), 1);
        assert_eq!(catalog.categories[0].entries[0].display_name, "Thing");
    }

    #[test]
    fn test_known_ids_are_lowercase_and_cover_both_catalogs() {
        let catalogs = Catalogs {
            programs: Catalog::embedded(CatalogKind::Programs).unwrap(),
            drivers: Catalog::embedded(CatalogKind::Drivers).unwrap(),
        };
        let known = catalogs.known_ids();

        assert!(known.iter().any(|(id, name)| id == "videolan.vlc" && name == "VLC media player"));
        assert!(known.iter().any(|(id, _)| id == "logitech.ghub"));
        assert!(known.iter().all(|(id, _)| *id == id.to_lowercase()));
    }
}
