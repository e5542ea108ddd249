//! Claim-path normalization.
//!
//! Two textual spellings of the same file must never hold separate claims,
//! so every path is normalized before it touches the claims table:
//! backslashes become slashes, `.` segments drop, `..` resolves lexically,
//! and the result is lowercased. Absolute paths and paths that escape the
//! workspace root are rejected.

use crate::{CoordError, Result};

/// Normalize a workspace-relative path for use as a claim key.
///
/// Returns `InvalidPath` for empty paths, absolute paths (POSIX or drive
/// letter), and paths whose `..` segments climb above the workspace root.
pub fn normalize_claim_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoordError::InvalidPath("empty path".to_string()));
    }

    let unified = trimmed.replace('\\', "/");

    if unified.starts_with('/') {
        return Err(CoordError::InvalidPath(format!(
            "absolute path not allowed: {}",
            raw
        )));
    }
    // Drive-letter absolute paths (e.g. "C:/...")
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(CoordError::InvalidPath(format!(
            "absolute path not allowed: {}",
            raw
        )));
    }

    let mut components: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if components.pop().is_none() {
                    return Err(CoordError::InvalidPath(format!(
                        "path escapes workspace root: {}",
                        raw
                    )));
                }
            }
            other => components.push(other),
        }
    }

    if components.is_empty() {
        return Err(CoordError::InvalidPath(format!(
            "path resolves to workspace root: {}",
            raw
        )));
    }

    Ok(components.join("/").to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_passes_through() {
        assert_eq!(
            normalize_claim_path("src/app.py").unwrap(),
            "src/app.py".to_string()
        );
    }

    #[test]
    fn test_spellings_collapse() {
        let canonical = normalize_claim_path("src/app.py").unwrap();
        assert_eq!(normalize_claim_path("./src/app.py").unwrap(), canonical);
        assert_eq!(normalize_claim_path("src/./app.py").unwrap(), canonical);
        assert_eq!(
            normalize_claim_path("src/sub/../app.py").unwrap(),
            canonical
        );
        assert_eq!(normalize_claim_path("SRC/App.py").unwrap(), canonical);
        assert_eq!(normalize_claim_path("src\\app.py").unwrap(), canonical);
        assert_eq!(normalize_claim_path("src//app.py").unwrap(), canonical);
    }

    #[test]
    fn test_rejects_escape_and_absolute() {
        assert!(normalize_claim_path("../secrets.txt").is_err());
        assert!(normalize_claim_path("a/../../b").is_err());
        assert!(normalize_claim_path("/etc/passwd").is_err());
        assert!(normalize_claim_path("C:\\windows\\system32").is_err());
        assert!(normalize_claim_path("").is_err());
        assert!(normalize_claim_path(".").is_err());
        assert!(normalize_claim_path("a/..").is_err());
    }
}
