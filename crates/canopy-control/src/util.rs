//! Small helpers shared across the crate.

use std::path::{Path, PathBuf};

use crate::error::{CanopyError, CanopyResult};
use crate::types::Cycles;

/// One trillion cycles ("TC"), the unit operators think in.
pub const ONE_TRILLION: Cycles = 1_000_000_000_000;

/// Format a cycles amount as trillions with three decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cycles_to_tc(cycles: Cycles) -> String {
    format!("{:.3}", cycles as f64 / ONE_TRILLION as f64)
}

/// Guess the MIME type of a file from its extension.
///
/// Unknown extensions fall back to `application/octet-stream`.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("otf") => "font/otf",
        _ => "application/octet-stream",
    }
}

/// Collect all regular files under `root`, recursively.
///
/// Paths are returned sorted so upload batches are deterministic.
pub fn collect_files(root: &Path) -> CanopyResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(CanopyError::validation(format!(
            "path {} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            CanopyError::validation(format!("cannot access path under {}: {e}", root.display()))
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("a/b/style.CSS")), "text/css");
        assert_eq!(content_type_for(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type_for(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(
            content_type_for(Path::new("data.bin")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(Path::new("no_extension")),
            "application/octet-stream"
        );
    }

    #[test]
    fn cycles_formatting() {
        assert_eq!(cycles_to_tc(ONE_TRILLION), "1.000");
        assert_eq!(cycles_to_tc(ONE_TRILLION / 2), "0.500");
        assert_eq!(cycles_to_tc(0), "0.000");
    }

    #[test]
    fn collect_files_walks_recursively() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        std::fs::write(dir.path().join("index.html"), "hi").expect("write failed");
        std::fs::create_dir(dir.path().join("assets")).expect("mkdir failed");
        std::fs::write(dir.path().join("assets").join("app.js"), "js").expect("write failed");

        let files = collect_files(dir.path()).expect("collect failed");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn collect_files_rejects_non_directory() {
        assert!(collect_files(Path::new("/definitely/not/here")).is_err());
    }
}
