//! Welle project configuration
//!
//! Loads the `welle.toml` manifest: project name, entry file, module search
//! paths, and default resource limits. The manifest is located by walking
//! upward from the target directory until one is found or the filesystem
//! root is reached. CLI flags override manifest values; resolution of the
//! final limits happens at the CLI layer.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Manifest file name.
pub const MANIFEST_FILE: &str = "welle.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {error}", file.display())]
    Toml {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The `welle.toml` manifest.
///
/// Limits follow the engine convention once resolved: `0` means unlimited,
/// positive values are hard caps. Negative values are rejected here; "unset"
/// is expressed by omitting the key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    /// Entry file, relative to the project root.
    pub entry: Option<String>,
    /// Standard library root, relative to the project root.
    pub std_root: Option<String>,
    /// Extra module search paths, relative to the project root.
    #[serde(default)]
    pub module_paths: Vec<String>,
    pub max_recursion: Option<i64>,
    pub max_steps: Option<i64>,
    pub max_mem: Option<i64>,
}

impl Manifest {
    /// Load and validate a manifest file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = toml::from_str(&content).map_err(|error| ConfigError::Toml {
            file: path.to_path_buf(),
            error,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("max_recursion", self.max_recursion),
            ("max_steps", self.max_steps),
            ("max_mem", self.max_mem),
        ] {
            if let Some(value) = value {
                if value < 0 {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("must be >= 0, got {value}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Walk upward from `start` looking for a manifest. Returns the project
    /// root (the directory holding `welle.toml`) and the parsed manifest.
    pub fn discover(start: &Path) -> ConfigResult<Option<(PathBuf, Manifest)>> {
        let mut current = if start.is_dir() {
            start.to_path_buf()
        } else {
            start.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()
        };
        if let Ok(canonical) = current.canonicalize() {
            current = canonical;
        }
        loop {
            let candidate = current.join(MANIFEST_FILE);
            if candidate.is_file() {
                let manifest = Manifest::load_from_file(&candidate)?;
                return Ok(Some((current, manifest)));
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_manifest() {
        let manifest: Manifest = toml::from_str(
            r#"
name = "demo"
entry = "main.wll"
std_root = "custom_std"
module_paths = ["modules", "vendor"]
max_recursion = 1000
max_steps = 500000
max_mem = 1048576
"#,
        )
        .unwrap();
        assert_eq!(manifest.name.as_deref(), Some("demo"));
        assert_eq!(manifest.entry.as_deref(), Some("main.wll"));
        assert_eq!(manifest.std_root.as_deref(), Some("custom_std"));
        assert_eq!(manifest.module_paths, vec!["modules", "vendor"]);
        assert_eq!(manifest.max_mem, Some(1048576));
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest: Manifest = toml::from_str("name = \"demo\"\n").unwrap();
        assert_eq!(manifest.entry, None);
        assert!(manifest.module_paths.is_empty());
        assert_eq!(manifest.max_mem, None);
    }

    #[test]
    fn test_comments_are_allowed() {
        let manifest: Manifest = toml::from_str(
            "# project manifest\nname = \"demo\" # trailing\nmax_mem = 10\n",
        )
        .unwrap();
        assert_eq!(manifest.max_mem, Some(10));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, "max_mem = -5\n").unwrap();
        let err = Manifest::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("max_mem"));
    }

    #[test]
    fn test_discover_walks_upward() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "name = \"root\"\n").unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let (root, manifest) = Manifest::discover(&nested).unwrap().unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
        assert_eq!(manifest.name.as_deref(), Some("root"));
    }

    #[test]
    fn test_discover_from_file_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "name = \"root\"\n").unwrap();
        let file = dir.path().join("main.wll");
        fs::write(&file, "print(1)\n").unwrap();

        let found = Manifest::discover(&file).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_discover_nothing() {
        let dir = TempDir::new().unwrap();
        // no manifest anywhere under a fresh temp dir (and none expected in
        // its parents on CI runners)
        let nested = dir.path().join("x");
        fs::create_dir_all(&nested).unwrap();
        let found = Manifest::discover(&nested).unwrap();
        if let Some((root, _)) = found {
            // a manifest above the temp dir would be an environment quirk,
            // not this crate's doing
            assert!(!root.starts_with(dir.path()));
        }
    }

    #[test]
    fn test_nearest_manifest_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "name = \"outer\"\n").unwrap();
        let inner = dir.path().join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join(MANIFEST_FILE), "name = \"inner\"\n").unwrap();

        let (_, manifest) = Manifest::discover(&inner).unwrap().unwrap();
        assert_eq!(manifest.name.as_deref(), Some("inner"));
    }
}
