//! AI CLI providers.

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use vsum_media::{MediaError, MediaResult, ProcessSpec};
use vsum_models::{ModelName, Provider};

/// Stderr wording that marks a failure as worth retrying. Status codes only
/// count as whole words, so paths and ids containing the digits do not.
static TRANSIENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:429|503)\b|rate[ _]?limit|too many requests|resource_exhausted|quota exceeded|overloaded|temporarily unavailable",
    )
    .unwrap()
});

/// Failure of a single provider invocation.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InvocationError::Transient(_))
    }

    pub fn from_media(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => InvocationError::Cancelled,
            MediaError::Timeout(secs) => InvocationError::Transient(format!("timed out after {}s", secs)),
            other => InvocationError::Permanent(other.to_string()),
        }
    }
}

/// One request to an AI CLI.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub prompt: String,
    pub frames_dir: PathBuf,
    pub frame_paths: Vec<PathBuf>,
    pub model: ModelName,
    pub timeout: Duration,
}

/// What the CLI returned.
#[derive(Debug, Clone, Default)]
pub struct InvocationOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl InvocationOutput {
    /// Interpret the output: the response text, or a classified failure.
    pub fn into_text(self, transient_exit_codes: &[i32]) -> Result<String, InvocationError> {
        if self.exit_code != Some(0) {
            let stderr = self.stderr.trim();
            let coded = self
                .exit_code
                .map(|code| transient_exit_codes.contains(&code))
                .unwrap_or(false);
            let message = format!(
                "exit status {:?}: {}",
                self.exit_code,
                stderr.lines().last().unwrap_or("no error output")
            );
            if coded || TRANSIENT_PATTERN.is_match(stderr) {
                return Err(InvocationError::Transient(message));
            }
            return Err(InvocationError::Permanent(message));
        }

        let text = String::from_utf8(self.stdout)
            .map_err(|_| InvocationError::Malformed("output is not valid UTF-8".to_string()))?;
        if text.trim().is_empty() {
            return Err(InvocationError::Malformed("empty output".to_string()));
        }
        Ok(text)
    }
}

/// An AI command-line tool that can look at frames.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn is_available(&self) -> bool {
        which::which(self.provider().command_name()).is_ok()
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<InvocationOutput>;
}

async fn run_spec(
    spec: ProcessSpec,
    cancel: Option<watch::Receiver<bool>>,
) -> MediaResult<InvocationOutput> {
    debug!(program = %spec.program(), args = ?spec.get_args(), "Invoking AI CLI");
    let output = spec.run(cancel).await?;
    Ok(InvocationOutput {
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Google Gemini CLI.
///
/// The prompt goes on stdin with an `@<dir>` reference to the frame
/// directory; individual `@file` references fail silently past a dozen files.
#[derive(Debug, Clone, Default)]
pub struct GeminiCli;

impl GeminiCli {
    pub fn build_spec(&self, invocation: &Invocation) -> ProcessSpec {
        let mut spec = ProcessSpec::new(Provider::Gemini.command_name())
            .args(["--output-format", "text", "--allowed-mcp-server-names="]);
        if let Some(model) = invocation.model.explicit() {
            spec = spec.args(["--model", model]);
        }
        let stdin = format!(
            "{}\n\nFrame directory: @{} ({} frames)",
            invocation.prompt,
            invocation.frames_dir.display(),
            invocation.frame_paths.len()
        );
        spec.arg("-y")
            .current_dir(&invocation.frames_dir)
            .stdin(stdin)
            .timeout(invocation.timeout)
    }
}

#[async_trait]
impl AiProvider for GeminiCli {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<InvocationOutput> {
        run_spec(self.build_spec(invocation), cancel).await
    }
}

/// Anthropic Claude Code CLI in print mode, restricted to reading files.
#[derive(Debug, Clone, Default)]
pub struct ClaudeCli;

impl ClaudeCli {
    pub fn build_spec(&self, invocation: &Invocation) -> ProcessSpec {
        let mut spec = ProcessSpec::new(Provider::Claude.command_name())
            .args(["-p", "--output-format", "text"]);
        if let Some(model) = invocation.model.explicit() {
            spec = spec.args(["--model", model]);
        }

        let mut stdin = format!(
            "{}\n\nRead these {} frame images in order:\n",
            invocation.prompt,
            invocation.frame_paths.len()
        );
        for path in &invocation.frame_paths {
            stdin.push_str(&path.display().to_string());
            stdin.push('\n');
        }

        spec.arg("--add-dir")
            .arg(invocation.frames_dir.to_string_lossy())
            .args(["--allowedTools", "Read"])
            .current_dir(&invocation.frames_dir)
            .stdin(stdin)
            .timeout(invocation.timeout)
    }
}

#[async_trait]
impl AiProvider for ClaudeCli {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<InvocationOutput> {
        run_spec(self.build_spec(invocation), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(model: &str) -> Invocation {
        Invocation {
            prompt: "Summarize".to_string(),
            frames_dir: PathBuf::from("/cache/abc_i5/frames"),
            frame_paths: vec![
                PathBuf::from("/cache/abc_i5/frames/frame_0001.jpg"),
                PathBuf::from("/cache/abc_i5/frames/frame_0002.jpg"),
            ],
            model: ModelName::new(model),
            timeout: Duration::from_secs(600),
        }
    }

    fn output(code: i32, stdout: &[u8], stderr: &str) -> InvocationOutput {
        InvocationOutput {
            exit_code: Some(code),
            stdout: stdout.to_vec(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_gemini_spec() {
        let spec = GeminiCli.build_spec(&invocation("gemini-2.5-pro"));
        assert_eq!(spec.program(), "gemini");
        assert_eq!(
            spec.get_args(),
            ["--output-format", "text", "--allowed-mcp-server-names=", "--model", "gemini-2.5-pro", "-y"]
        );
        let stdin = String::from_utf8(spec.get_stdin().unwrap().to_vec()).unwrap();
        assert!(stdin.starts_with("Summarize"));
        assert!(stdin.ends_with("@/cache/abc_i5/frames (2 frames)"));
        assert_eq!(spec.get_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_auto_model_omits_flag() {
        let spec = GeminiCli.build_spec(&invocation("auto"));
        assert!(!spec.get_args().iter().any(|a| a == "--model"));
    }

    #[test]
    fn test_claude_spec() {
        let spec = ClaudeCli.build_spec(&invocation("auto"));
        assert_eq!(spec.program(), "claude");
        assert_eq!(
            spec.get_args(),
            ["-p", "--output-format", "text", "--add-dir", "/cache/abc_i5/frames", "--allowedTools", "Read"]
        );
        let stdin = String::from_utf8(spec.get_stdin().unwrap().to_vec()).unwrap();
        assert!(stdin.contains("frame_0002.jpg"));
    }

    #[test]
    fn test_output_classification() {
        assert_eq!(output(0, b"## Summary\nok", "").into_text(&[]).unwrap(), "## Summary\nok");
        assert!(matches!(
            output(0, b"  \n", "").into_text(&[]),
            Err(InvocationError::Malformed(_))
        ));
        assert!(matches!(
            output(0, &[0xff, 0xfe], "").into_text(&[]),
            Err(InvocationError::Malformed(_))
        ));
        assert!(output(1, b"", "Error: RESOURCE_EXHAUSTED").into_text(&[]).unwrap_err().is_transient());
        assert!(output(75, b"", "boom").into_text(&[75]).unwrap_err().is_transient());
        assert!(!output(1, b"", "invalid model").into_text(&[]).unwrap_err().is_transient());
    }

    #[test]
    fn test_status_codes_match_only_as_words() {
        assert!(output(1, b"", "HTTP 429 Too Many Requests").into_text(&[]).unwrap_err().is_transient());
        assert!(output(1, b"", "status=503").into_text(&[]).unwrap_err().is_transient());
        assert!(output(1, b"", "Rate limit reached").into_text(&[]).unwrap_err().is_transient());

        let err = output(1, b"", "cannot read /tmp/frames/frame_0429.jpg").into_text(&[]).unwrap_err();
        assert!(!err.is_transient());
        let err = output(1, b"", "request 15034 rejected: bad prompt").into_text(&[]).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_media_error_mapping() {
        assert!(InvocationError::from_media(MediaError::Timeout(600)).is_transient());
        assert!(matches!(InvocationError::from_media(MediaError::Cancelled), InvocationError::Cancelled));
        assert!(!InvocationError::from_media(MediaError::tool_not_found("gemini")).is_transient());
    }
}
