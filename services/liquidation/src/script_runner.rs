//! Script Runner
//!
//! Runs the external extraction and publish scripts as child processes and
//! reads their JSON output.

use aduana_utils::{AduanaError, AduanaResult, ScriptsConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

/// Captured output of one script run
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    python: String,
    scripts_dir: PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl ScriptRunner {
    pub fn new(config: &ScriptsConfig) -> Self {
        Self {
            python: config.python.clone(),
            scripts_dir: PathBuf::from(&config.scripts_dir),
            timeout: Duration::from_secs(config.timeout_seconds),
            env: vec![("PYTHONIOENCODING".to_string(), "utf-8".to_string())],
        }
    }

    /// Extra environment passed to every script.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub async fn run(&self, script: &str, args: &[&str]) -> AduanaResult<ScriptOutput> {
        let script_path = self.scripts_dir.join(script);
        if !script_path.exists() {
            return Err(AduanaError::configuration(format!(
                "Script not found: {}",
                script_path.display()
            )));
        }

        let mut command = Command::new(&self.python);
        command
            .arg(&script_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }

        tracing::info!(script, "Running script");
        let started = std::time::Instant::now();

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                AduanaError::external_service(
                    script,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| AduanaError::external_service(script, format!("failed to start: {}", e)))?;

        let result = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        };

        if !result.stderr.trim().is_empty() {
            tracing::debug!(script, stderr = %result.stderr.trim(), "Script stderr");
        }
        tracing::info!(
            script,
            code = result.code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Script finished"
        );

        Ok(result)
    }

    /// Run a script and parse its stdout as JSON. A non-zero exit is an
    /// external-service error.
    pub async fn run_json(&self, script: &str, args: &[&str]) -> AduanaResult<Value> {
        let output = self.run(script, args).await?;
        if output.code != 0 {
            let detail = first_non_empty(&output.stderr, &output.stdout);
            return Err(AduanaError::external_service(
                script,
                format!("exit code {}: {}", output.code, truncate(detail, 400)),
            ));
        }

        parse_json_loose(&output.stdout)
            .ok_or_else(|| AduanaError::external_service(script, "script output is not JSON"))
    }
}

/// Parse JSON that may be preceded by log lines or a byte-order mark.
/// Falls back to the last `{...}` span of the text.
pub fn parse_json_loose(text: &str) -> Option<Value> {
    let trimmed = text.trim().trim_start_matches('\u{feff}');
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Some(value);
    }

    let end = trimmed.rfind('}')?;
    trimmed[..end]
        .match_indices('{')
        .map(|(start, _)| start)
        .find_map(|start| serde_json::from_str(&trimmed[start..=end]).ok())
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.trim().is_empty() {
        b.trim()
    } else {
        a.trim()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// A file in the temp directory removed when dropped.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub async fn write(file_name: &str, data: &[u8]) -> AduanaResult<Self> {
        let safe_name: String = file_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        let path = std::env::temp_dir().join(format!("{}-{}", Uuid::new_v4(), safe_name));
        tokio::fs::write(&path, data).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_loose() {
        assert_eq!(parse_json_loose("{\"success\": true}"), Some(json!({"success": true})));
        assert_eq!(
            parse_json_loose("\u{feff}  {\"rows\": []}\n"),
            Some(json!({"rows": []}))
        );
        assert_eq!(
            parse_json_loose("loading model...\nWARN x\n{\"success\": true, \"rows\": 3}"),
            Some(json!({"success": true, "rows": 3}))
        );
        assert_eq!(
            parse_json_loose("```json\n{\"hsCode\": \"8518\"}\n```"),
            Some(json!({"hsCode": "8518"}))
        );
        assert_eq!(parse_json_loose("Traceback (most recent call last)"), None);
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let path = {
            let file = TempFile::write("pro forma/1.pdf", b"%PDF").await.unwrap();
            assert!(file.path().exists());
            assert!(file.path_str().ends_with("pro_forma_1.pdf"));
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_script_is_configuration_error() {
        let runner = ScriptRunner::new(&ScriptsConfig {
            python: "python".into(),
            scripts_dir: "/nonexistent".into(),
            timeout_seconds: 1,
            max_pages: 1,
            image_extraction_script: "a.py".into(),
            table_extraction_script: "b.py".into(),
            rasterize_script: "c.py".into(),
            publish_script: "d.py".into(),
        });
        let err = runner.run_json("a.py", &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}
