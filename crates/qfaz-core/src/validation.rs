//! Local checks on report files, run before anything is sent

use std::path::Path;

use thiserror::Error;

/// Largest accepted report (50 MiB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Accepted report extensions (compared case-insensitively)
pub const ALLOWED_EXTENSIONS: &[&str] = &[".csv", ".xlsx", ".xls"];

/// Words expected somewhere in a Storm report's file name
pub const STORM_NAME_HINTS: &[&str] = &["storm", "contratos", "digitados", "pagos"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File {name} has an unsupported format. Use CSV, XLSX or XLS.")]
    UnsupportedExtension { name: String },

    #[error("File {name} is too large ({size} bytes, maximum 50 MiB)")]
    TooLarge { name: String, size: u64 },

    #[error("File {path} could not be read: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Lowercased extension including the dot, e.g. `.xlsx`
pub fn extension(name: &str) -> Option<String> {
    name.rfind('.').map(|idx| name[idx..].to_lowercase())
}

/// Check a report's name and size
pub fn validate_file(name: &str, size: u64) -> Result<(), ValidationError> {
    let supported = extension(name)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);

    if !supported {
        return Err(ValidationError::UnsupportedExtension {
            name: name.to_string(),
        });
    }

    if size > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge {
            name: name.to_string(),
            size,
        });
    }

    Ok(())
}

/// Whether a file name looks like a Storm report. Only used for warnings.
pub fn looks_like_storm_report(name: &str) -> bool {
    let name = name.to_lowercase();
    STORM_NAME_HINTS.iter().any(|hint| name.contains(hint))
}

/// Display name of a path (its final component)
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
