//! Projector and watcher configuration.
//!
//! Loaded once from a TOML file and passed explicitly into each component at
//! construction. Defaults mirror the conventions of the document tree this
//! system was built for (Spanish-language archive folders, `00*` scratch
//! directories, PDF companion documents).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigiaError};

/// Rules applied by the file projection before any row is written.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemRules {
    /// Extensions (lowercase, no dot) whose files are never projected.
    pub omit_extensions: HashSet<String>,
    /// Directory names that exclude a whole path when any segment matches.
    pub omit_directories: HashSet<String>,
    /// Directory-name prefixes that exclude a whole path.
    pub omit_directory_prefixes: Vec<String>,
}

impl Default for FilesystemRules {
    fn default() -> Self {
        Self {
            omit_extensions: to_set(&["cfg", "db"]),
            omit_directories: to_set(&["build", "debug"]),
            omit_directory_prefixes: vec!["00".into()],
        }
    }
}

/// Rules for master-candidacy evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterRules {
    /// Extensions that may become a master file.
    pub master_extensions: HashSet<String>,
    /// Companion-document extensions that qualify a master.
    pub slave_extensions: HashSet<String>,
    pub omit_directories: HashSet<String>,
    pub omit_directory_prefixes: Vec<String>,
}

impl Default for MasterRules {
    fn default() -> Self {
        Self {
            master_extensions: to_set(&["par", "asm", "doc", "docx", "xls", "xlsx"]),
            slave_extensions: to_set(&["pdf"]),
            omit_directories: to_set(&["ARCHIVO", "MODIFICAR", ".git", ".svn"]),
            omit_directory_prefixes: vec!["00".into(), "_".into(), ".".into()],
        }
    }
}

/// Rules for the parts projection. Omit lists are reused from
/// [`MasterRules`] so both projections skip the same folders.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartRules {
    pub part_extensions: Option<HashSet<String>>,
}

impl PartRules {
    pub fn part_extensions(&self) -> HashSet<String> {
        self.part_extensions
            .clone()
            .unwrap_or_else(|| to_set(&["par", "asm", "doc", "docx", "xls", "xlsx"]))
    }
}

/// Watcher loop tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Bound of the notify -> tokio bridge channel.
    pub channel_capacity: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigiaConfig {
    pub filesystem: FilesystemRules,
    pub masterfiles: MasterRules,
    pub parts: PartRules,
    pub watcher: WatcherSettings,
}

impl VigiaConfig {
    /// Load from a TOML file. A missing file yields the defaults; a present
    /// but malformed file is a startup error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|err| VigiaError::Config(format!("{}: {err}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(VigiaError::Config(format!("{}: {err}", path.display()))),
        }
    }
}

/// Case-insensitive segment check shared by every projector: a path is
/// skipped when any segment equals an omitted directory name or starts with
/// an omitted prefix.
pub fn path_is_omitted(
    path: &crate::path::TreePath,
    omit_directories: &HashSet<String>,
    omit_directory_prefixes: &[String],
) -> bool {
    let omit: Vec<String> = omit_directories.iter().map(|d| d.to_lowercase()).collect();
    let prefixes: Vec<String> = omit_directory_prefixes
        .iter()
        .map(|p| p.to_lowercase())
        .collect();

    for segment in path.segments() {
        let segment = segment.to_lowercase();
        if omit.iter().any(|dir| *dir == segment) {
            return true;
        }
        if prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && segment.starts_with(prefix))
        {
            return true;
        }
    }
    false
}

/// Case-insensitive extension membership.
pub fn extension_in(ext: Option<&str>, set: &HashSet<String>) -> bool {
    match ext {
        Some(ext) => {
            let ext = ext.to_lowercase();
            set.iter().any(|candidate| candidate.to_lowercase() == ext)
        }
        None => false,
    }
}

fn to_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::TreePath;

    #[test]
    fn defaults_cover_the_standard_tree() {
        let config = VigiaConfig::default();
        assert!(config.masterfiles.master_extensions.contains("par"));
        assert!(config.masterfiles.slave_extensions.contains("pdf"));
        assert!(config.parts.part_extensions().contains("asm"));
    }

    #[test]
    fn omit_matching_is_case_insensitive() {
        let rules = MasterRules::default();
        let archived = TreePath::new("MAIN/archivo/file.par").unwrap();
        assert!(path_is_omitted(
            &archived,
            &rules.omit_directories,
            &rules.omit_directory_prefixes
        ));

        let scratch = TreePath::new("MAIN/00-old/file.par").unwrap();
        assert!(path_is_omitted(
            &scratch,
            &rules.omit_directories,
            &rules.omit_directory_prefixes
        ));

        let kept = TreePath::new("MAIN/SUB/file.par").unwrap();
        assert!(!path_is_omitted(
            &kept,
            &rules.omit_directories,
            &rules.omit_directory_prefixes
        ));
    }

    #[test]
    fn extension_checks_ignore_case() {
        let rules = MasterRules::default();
        assert!(extension_in(Some("PAR"), &rules.master_extensions));
        assert!(!extension_in(Some("txt"), &rules.master_extensions));
        assert!(!extension_in(None, &rules.master_extensions));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = VigiaConfig::load(&tmp.path().join("vigia.toml")).unwrap();
        assert!(config.filesystem.omit_extensions.contains("cfg"));
    }

    #[test]
    fn malformed_config_is_a_startup_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("vigia.toml");
        std::fs::write(&path, "not [valid").unwrap();
        assert!(VigiaConfig::load(&path).is_err());
    }

    #[test]
    fn toml_round_trip() {
        let raw = r#"
            [filesystem]
            omit_extensions = ["tmp"]

            [masterfiles]
            slave_extensions = ["pdf", "dwf"]
        "#;
        let config: VigiaConfig = toml::from_str(raw).unwrap();
        assert!(config.filesystem.omit_extensions.contains("tmp"));
        assert!(config.masterfiles.slave_extensions.contains("dwf"));
        // untouched sections keep their defaults
        assert!(config.masterfiles.master_extensions.contains("par"));
    }
}
