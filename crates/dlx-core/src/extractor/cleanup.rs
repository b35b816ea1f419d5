//! Artifact cleanup: removes the per-request temp dir and tracked output
//! paths, refusing to touch anything outside `out_dir`.

use std::path::{Path, PathBuf};

/// Removes `out_dir/.tmp/<id>` and every candidate path (the tracked
/// artifacts plus, if given, `out_dir/<filename>`) that resolves beneath
/// `out_dir`. Paths outside `out_dir` are refused rather than silently
/// skipped. Errors are accumulated and returned jointly.
pub fn cleanup_artifacts(
    out_dir: &Path,
    id: &str,
    filename: Option<&str>,
    tracked_paths: &[String],
) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let tmp_dir = out_dir.join(".tmp").join(id);
    if tmp_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&tmp_dir) {
            errors.push(format!("remove temp dir {}: {e}", tmp_dir.display()));
        }
    }

    let mut candidates: Vec<PathBuf> = tracked_paths.iter().map(PathBuf::from).collect();
    if let Some(name) = filename {
        candidates.push(out_dir.join(name));
    }

    for path in candidates {
        match is_contained(out_dir, &path) {
            Ok(true) => {
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        errors.push(format!("remove {}: {e}", path.display()));
                    }
                }
            }
            Ok(false) => errors.push(format!(
                "refusing path outside out_dir: {}",
                path.display()
            )),
            Err(e) => errors.push(format!("resolve {}: {e}", path.display())),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_contained(out_dir: &Path, candidate: &Path) -> std::io::Result<bool> {
    let out_canon = std::fs::canonicalize(out_dir)?;
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        out_dir.join(candidate)
    };
    let parent = joined.parent().unwrap_or(&joined);
    let parent_canon = match std::fs::canonicalize(parent) {
        Ok(p) => p,
        Err(_) => return Ok(false),
    };
    Ok(parent_canon.starts_with(&out_canon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn removes_temp_dir_and_tracked_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path();
        let tmp = out_dir.join(".tmp").join("abc");
        fs::create_dir_all(&tmp).unwrap();
        let artifact = out_dir.join("clip.mp4");
        fs::write(&artifact, b"data").unwrap();

        let result = cleanup_artifacts(
            out_dir,
            "abc",
            Some("clip.mp4"),
            &[artifact.to_string_lossy().into_owned()],
        );

        assert!(result.is_ok());
        assert!(!tmp.exists());
        assert!(!artifact.exists());
    }

    #[test]
    fn refuses_path_escaping_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path();
        let outside = dir.path().parent().unwrap().join("escaped.mp4");
        fs::write(&outside, b"data").unwrap();

        let result = cleanup_artifacts(
            out_dir,
            "abc",
            None,
            &[outside.to_string_lossy().into_owned()],
        );

        assert!(result.is_err());
        assert!(outside.exists());
        let _ = fs::remove_file(&outside);
    }
}
