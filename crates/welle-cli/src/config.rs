//! Project context shared by the CLI commands
//!
//! Ties together manifest discovery, resolver construction, and limit
//! resolution (CLI flag overrides manifest; `-1` means the flag was not
//! given, `0` means unlimited).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use welle_config::Manifest;
use welle_runtime::Resolver;

/// The project a command operates in. When no manifest exists the current
/// directory stands in as the root with default settings.
pub struct ProjectContext {
    pub root: PathBuf,
    pub manifest: Manifest,
}

impl ProjectContext {
    /// Discover the project by walking upward from `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        match Manifest::discover(start).context("loading welle.toml")? {
            Some((root, manifest)) => Ok(Self { root, manifest }),
            None => {
                let root = std::env::current_dir().context("reading current directory")?;
                Ok(Self {
                    root,
                    manifest: Manifest::default(),
                })
            }
        }
    }

    /// Standard library root: the manifest's `std_root` (relative to the
    /// project root) or `<root>/std`.
    pub fn std_root(&self) -> PathBuf {
        match &self.manifest.std_root {
            Some(dir) => self.root.join(dir),
            None => self.root.join("std"),
        }
    }

    /// Bare-name search order: each `module_paths` entry, then the project
    /// root, then the current directory.
    pub fn resolver(&self) -> Resolver {
        let mut search_paths: Vec<PathBuf> = self
            .manifest
            .module_paths
            .iter()
            .map(|p| self.root.join(p))
            .collect();
        search_paths.push(self.root.clone());
        if let Ok(cwd) = std::env::current_dir() {
            search_paths.push(cwd);
        }
        Resolver::new(self.std_root(), search_paths)
    }
}

/// Combine a CLI limit flag with the manifest default. The flag wins when
/// given (`>= 0`); otherwise the manifest value applies; otherwise
/// unlimited.
pub fn effective_limit(cli: i64, manifest: Option<i64>) -> u64 {
    if cli >= 0 {
        cli as u64
    } else {
        manifest.map(|v| v.max(0) as u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flag_overrides_manifest() {
        assert_eq!(effective_limit(1000, Some(10)), 1000);
        assert_eq!(effective_limit(0, Some(10)), 0);
    }

    #[test]
    fn test_manifest_applies_when_flag_unset() {
        assert_eq!(effective_limit(-1, Some(10)), 10);
        assert_eq!(effective_limit(-1, None), 0);
    }
}
