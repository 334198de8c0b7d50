//! Test discovery
//!
//! A test is any `*.test.wll` file, plus every `.wll` file under a `tests/`
//! directory except those under `tests/fixtures/` (fixtures are modules the
//! tests import, not tests themselves).

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Collect test files under each root, sorted for deterministic runs.
pub fn discover(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if is_test_file(root, entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

fn is_test_file(root: &Path, path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.ends_with(".test.wll") {
        return true;
    }
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.starts_with("tests")
        && !rel.starts_with("tests/fixtures")
        && path.extension().is_some_and(|ext| ext == "wll")
}
