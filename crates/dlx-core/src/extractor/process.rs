//! Real [`ExtractorRunner`] that drives the external tool as a subprocess.

use super::{parse, validate_url, Callbacks, ExtractorRunner};
use crate::error::ExtractorError;
use crate::item::ItemMeta;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STDERR_TAIL_BYTES: usize = 512;
const POSTPROCESSING_MARKER: &str = "postprocessing: error opening output files";
/// Substring the extractor prints on known extraction failures caused by a
/// site change it hasn't shipped a fix for yet.
const OUTDATED_MARKER: &str = "please update";

pub struct ProcessExtractorRunner {
    binary: String,
    out_dir: PathBuf,
    max_title_len: usize,
    callbacks: Callbacks,
}

impl ProcessExtractorRunner {
    pub fn new(binary: String, out_dir: PathBuf, max_title_len: usize, callbacks: Callbacks) -> Self {
        Self {
            binary,
            out_dir,
            max_title_len,
            callbacks,
        }
    }

    async fn preflight(&self) -> Result<(), ExtractorError> {
        let output = Command::new(&self.binary)
            .arg("--help")
            .output()
            .await
            .map_err(|_| ExtractorError::NotFound)?;
        let text = String::from_utf8_lossy(&output.stdout);
        if !text.contains("progress-template") {
            return Err(ExtractorError::NotFound);
        }
        Ok(())
    }

    fn build_args(&self, url: &str, tmp_dir: &std::path::Path, embed_thumbnail: bool) -> Vec<String> {
        let template = format!("%(title).{}s [%(id)s].%(ext)s", self.max_title_len);
        let mut args = vec![
            url.to_string(),
            "--newline".to_string(),
            "--continue".to_string(),
            "--paths".to_string(),
            format!("temp:{}", tmp_dir.display()),
            "--paths".to_string(),
            format!("home:{}", self.out_dir.display()),
            "--output".to_string(),
            template,
            "--progress-template".to_string(),
            "downloading:{\"status\":\"downloading\",\"downloaded_bytes\":%(progress.downloaded_bytes)s,\"total_bytes\":%(progress.total_bytes)s,\"total_bytes_estimate\":%(progress.total_bytes_estimate)s}".to_string(),
            "--embed-metadata".to_string(),
            "--embed-chapters".to_string(),
        ];
        if embed_thumbnail {
            args.push("--embed-thumbnail".to_string());
        }
        args
    }

    async fn run_once(
        &self,
        ctx: &CancellationToken,
        id: &str,
        url: &str,
        tmp_dir: &std::path::Path,
        embed_thumbnail: bool,
    ) -> Result<(String, Vec<String>), ExtractorError> {
        let args = self.build_args(url, tmp_dir, embed_thumbnail);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");

        let on_progress = self.callbacks.on_progress.clone();
        let id_owned = id.to_string();
        let stdout_task = tokio::spawn(async move {
            let mut combined = String::new();
            while let Ok(Some(line)) = stdout_lines.next_line().await {
                match parse::parse_progress_line(&line) {
                    Some(pct) => on_progress(&id_owned, pct),
                    None => {
                        combined.push_str(&line);
                        combined.push('\n');
                    }
                }
            }
            combined
        });

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.cancelled() => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(ExtractorError::Canceled);
            }
        };

        let stdout_combined = stdout_task.await.unwrap_or_default();
        let stderr_combined = stderr_task.await.unwrap_or_default();

        if !status.success() {
            if stderr_combined.contains(POSTPROCESSING_MARKER) {
                return Err(ExtractorError::Postprocessing(stderr_combined));
            }
            if stderr_combined.to_lowercase().contains(OUTDATED_MARKER) {
                return Err(ExtractorError::Outdated);
            }
            return Err(ExtractorError::Extraction(tail_str(
                &stderr_combined,
                STDERR_TAIL_BYTES,
            )));
        }

        let combined = format!("{stdout_combined}\n{stderr_combined}");
        let filename = parse::extract_final_filename(&combined).unwrap_or_default();
        let artifacts = parse::extract_artifact_paths(&combined, &self.out_dir);
        Ok((filename, artifacts))
    }
}

#[async_trait]
impl ExtractorRunner for ProcessExtractorRunner {
    async fn download(
        &self,
        ctx: CancellationToken,
        id: &str,
        url: &str,
    ) -> Result<(), ExtractorError> {
        validate_url(url)?;
        self.preflight().await?;

        let tmp_dir = self.out_dir.join(".tmp").join(id);
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let mut result = self.run_once(&ctx, id, url, &tmp_dir, true).await;

        if let Err(ExtractorError::Postprocessing(_)) = &result {
            let _ = tokio::fs::remove_dir_all(&tmp_dir).await;
            tokio::fs::create_dir_all(&tmp_dir).await?;
            result = self.run_once(&ctx, id, url, &tmp_dir, false).await;
        }

        let _ = tokio::fs::remove_dir_all(&tmp_dir).await;

        let (filename, artifacts) = result?;
        (self.callbacks.on_filename)(id, &filename);
        (self.callbacks.on_artifacts)(id, &artifacts);
        Ok(())
    }

    async fn fetch_metadata(
        &self,
        ctx: CancellationToken,
        url: &str,
    ) -> Result<ItemMeta, ExtractorError> {
        validate_url(url)?;

        let child = Command::new(&self.binary)
            .args(["--dump-json", "--no-playlist", "--skip-download", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = ctx.cancelled() => return Err(ExtractorError::Canceled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains(OUTDATED_MARKER) {
                return Err(ExtractorError::Outdated);
            }
            return Err(ExtractorError::NoMediaInfo);
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_metadata_json(&text).ok_or(ExtractorError::NoMediaInfo)
    }
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

fn parse_metadata_json(text: &str) -> Option<ItemMeta> {
    let first_line = text.lines().next()?;
    let raw: RawMetadata = serde_json::from_str(first_line).ok()?;
    Some(ItemMeta {
        title: raw.title,
        duration_seconds: raw.duration.map(|d| d as u64),
        thumbnail_url: raw.thumbnail,
    })
}

fn tail_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_json_parses_first_line() {
        let text = "{\"title\":\"Clip\",\"duration\":12.5,\"thumbnail\":\"https://x/y.jpg\"}\n";
        let meta = parse_metadata_json(text).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Clip"));
        assert_eq!(meta.duration_seconds, Some(12));
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://x/y.jpg"));
    }

    #[test]
    fn tail_str_respects_utf8_boundary() {
        let s = "é".repeat(400);
        let t = tail_str(&s, 512);
        assert!(t.len() <= 512);
        assert!(t.is_char_boundary(0));
    }

    #[test]
    fn outdated_marker_is_case_insensitive() {
        let stderr = "ERROR: Unable to extract video data; Please Update to the latest version";
        assert!(stderr.to_lowercase().contains(OUTDATED_MARKER));
    }
}
