//! Module resolution
//!
//! Maps an import spec plus the importing file to an absolute module path.
//! Resolution order:
//!
//! 1. `std:NAME` — the standard library root
//! 2. `./`, `../`, or absolute paths — relative to the importing file
//! 3. bare names — std root, then each search path in order
//!
//! The resolver does no I/O beyond existence checks and canonicalization.
//! Resolved paths are absolute and point at regular files.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The file extension welle modules use.
pub const MODULE_EXTENSION: &str = "wll";

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("invalid std import \"{spec}\"")]
    InvalidStd { spec: String },
    #[error(
        "cannot resolve import \"{spec}\" from {} (tried: {})",
        from.display(),
        Attempts(attempts)
    )]
    NotFound {
        spec: String,
        from: PathBuf,
        attempts: Vec<PathBuf>,
    },
}

struct Attempts<'a>(&'a [PathBuf]);

impl fmt::Display for Attempts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

/// Module resolver
#[derive(Debug, Clone)]
pub struct Resolver {
    std_root: PathBuf,
    search_paths: Vec<PathBuf>,
}

impl Resolver {
    pub fn new(std_root: PathBuf, search_paths: Vec<PathBuf>) -> Self {
        Self {
            std_root,
            search_paths,
        }
    }

    /// Resolve `spec` as imported from `from_file`.
    pub fn resolve(&self, from_file: &Path, spec: &str) -> Result<PathBuf, ResolveError> {
        if let Some(name) = spec.strip_prefix("std:") {
            if name.is_empty() {
                return Err(ResolveError::InvalidStd {
                    spec: spec.to_string(),
                });
            }
            let candidate = with_extension(self.std_root.join(name));
            return self.first_hit(spec, from_file, vec![candidate]);
        }

        if spec.starts_with("./") || spec.starts_with("../") || Path::new(spec).is_absolute() {
            let path = Path::new(spec);
            let joined = if path.is_absolute() {
                path.to_path_buf()
            } else {
                from_file
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(path)
            };
            return self.first_hit(spec, from_file, vec![with_extension(joined)]);
        }

        // Bare name: std root, then each search path in order.
        let mut attempts = vec![with_extension(self.std_root.join(spec))];
        for search_path in &self.search_paths {
            attempts.push(with_extension(search_path.join(spec)));
        }
        self.first_hit(spec, from_file, attempts)
    }

    fn first_hit(
        &self,
        spec: &str,
        from_file: &Path,
        attempts: Vec<PathBuf>,
    ) -> Result<PathBuf, ResolveError> {
        for candidate in &attempts {
            if candidate.is_file() {
                if let Ok(absolute) = candidate.canonicalize() {
                    return Ok(absolute);
                }
            }
        }
        Err(ResolveError::NotFound {
            spec: spec.to_string(),
            from: from_file.to_path_buf(),
            attempts,
        })
    }
}

/// Append the module extension only when the path has none.
fn with_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_none() {
        path.with_extension(MODULE_EXTENSION)
    } else {
        path
    }
}
