//! Parsing of the extractor's stdout/stderr: progress ticks, final filename,
//! and produced artifact paths.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ProgressRecord {
    status: Option<String>,
    downloaded_bytes: Option<f64>,
    total_bytes: Option<f64>,
    total_bytes_estimate: Option<f64>,
}

/// Splits raw output on LF, CRLF, or bare CR — the extractor rewrites the
/// same terminal line for progress ticks using a bare CR.
pub fn split_lines(raw: &str) -> Vec<&str> {
    raw.split(['\n', '\r']).filter(|s| !s.is_empty()).collect()
}

/// Parses one progress-template line into a percentage in `[0, 100]`.
/// Returns `None` for any line that isn't a `"status":"downloading"` record
/// with a usable total.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let record: ProgressRecord = serde_json::from_str(line.trim()).ok()?;
    if record.status.as_deref() != Some("downloading") {
        return None;
    }
    let downloaded = record.downloaded_bytes?;
    let total = record.total_bytes.or(record.total_bytes_estimate)?;
    if total <= 0.0 {
        return None;
    }
    Some((downloaded / total * 100.0).clamp(0.0, 100.0))
}

fn extract_quoted(line: &str) -> Option<String> {
    let bytes = line.as_bytes();
    let mut open: Option<(usize, u8)> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\'' || b == b'"' {
            match open {
                None => open = Some((i, b)),
                Some((start, q)) if q == b => return Some(line[start + 1..i].to_string()),
                _ => {}
            }
        }
    }
    None
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Scans combined stdout/stderr for the final filename in priority order:
/// merged-output line, already-downloaded line, then a `Destination:` line.
pub fn extract_final_filename(output: &str) -> Option<String> {
    let lines = split_lines(output);

    for line in lines.iter().rev() {
        if line.contains("Merging formats into") {
            if let Some(name) = extract_quoted(line) {
                return Some(basename(&name).to_string());
            }
        }
    }

    for line in lines.iter().rev() {
        if let Some(idx) = line.find("has already been downloaded") {
            let prefix = &line[..idx];
            if let Some(start) = prefix.rfind("] ") {
                let name = prefix[start + 2..].trim();
                if !name.is_empty() {
                    return Some(basename(name).to_string());
                }
            }
        }
    }

    for line in lines.iter().rev() {
        if let Some(idx) = line.find("Destination: ") {
            let path = line[idx + "Destination: ".len()..].trim();
            if !path.is_empty() {
                return Some(basename(path).to_string());
            }
        }
    }

    None
}

/// Collects every artifact path mentioned in destination/merger/already-downloaded
/// lines, deduplicated in insertion order and normalized to absolute paths
/// under `out_dir`.
pub fn extract_artifact_paths(output: &str, out_dir: &Path) -> Vec<String> {
    let mut paths = Vec::new();
    let mut seen = HashSet::new();

    for line in split_lines(output) {
        let candidate = if let Some(idx) = line.find("Destination: ") {
            Some(line[idx + "Destination: ".len()..].trim().to_string())
        } else if line.contains("Merging formats into") {
            extract_quoted(line)
        } else if let Some(idx) = line.find("has already been downloaded") {
            let prefix = &line[..idx];
            prefix.rfind("] ").map(|s| prefix[s + 2..].trim().to_string())
        } else {
            None
        };

        let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
            continue;
        };
        let abs = normalize_under(out_dir, &candidate);
        if seen.insert(abs.clone()) {
            paths.push(abs);
        }
    }

    paths
}

fn normalize_under(out_dir: &Path, candidate: &str) -> String {
    let p = Path::new(candidate);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        out_dir.join(p)
    };
    abs.to_string_lossy().into_owned()
}
