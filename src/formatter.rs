use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::models::FormatOutcome;
use crate::Config;

const MAX_OUTPUT_SIZE: usize = 1_048_576; // 1MiB

/// Which formatter output streams end up in a successful response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Only stdout. Formatter diagnostics never leak into the result.
    Stdout,
    /// Stdout followed by stderr.
    Combined,
}

/// Normalizes submitted source before it reaches the formatter: every
/// carriage return is removed and any run of trailing line terminators is
/// collapsed so that non-empty output ends with exactly one `\n`.
pub fn sanitize(input: &str) -> String {
    let stripped = input.replace('\r', "");
    let body = stripped.trim_end_matches('\n');
    if body.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(body.len() + 1);
    out.push_str(body);
    out.push('\n');
    out
}

pub fn truncate_output(mut output: Vec<u8>) -> Vec<u8> {
    if output.len() > MAX_OUTPUT_SIZE {
        output.truncate(MAX_OUTPUT_SIZE);
        output.extend_from_slice(b"\n... (output truncated)");
    }
    output
}

/// Runs the configured formatter over `source`, feeding it on stdin and
/// racing completion against the configured deadline. The child is spawned
/// with kill-on-drop, so whichever side loses the race is reclaimed
/// immediately; no child outlives its request.
pub async fn run_formatter(config: &Config, source: &str) -> FormatOutcome {
    let mut cmd = Command::new(&config.formatter_path);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return FormatOutcome::Failed(format!("failed to spawn formatter: {e}")),
    };

    let Some(mut stdin) = child.stdin.take() else {
        return FormatOutcome::Failed("formatter stdin unavailable".into());
    };

    let input = source.as_bytes().to_vec();
    let run = async move {
        // Feed stdin while draining the output pipes; writing first and
        // collecting afterwards deadlocks once input and output both
        // exceed the OS pipe buffers.
        let (_, output) = tokio::join!(
            async move {
                // The formatter may exit before consuming all of its
                // input; a broken pipe here is classified by the exit
                // status below.
                let _ = stdin.write_all(&input).await;
                drop(stdin); // close the pipe so the formatter sees EOF
            },
            child.wait_with_output()
        );
        output
    };

    let deadline = Duration::from_millis(config.timeout_ms);
    match timeout(deadline, run).await {
        Ok(Ok(output)) if output.status.success() => {
            let mut body = output.stdout;
            if config.capture_mode == CaptureMode::Combined {
                body.extend_from_slice(&output.stderr);
            }
            FormatOutcome::Succeeded(truncate_output(body))
        }
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().next().unwrap_or("").trim().to_string();
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            if detail.is_empty() {
                FormatOutcome::Failed(format!("formatter exited with status {code}"))
            } else {
                FormatOutcome::Failed(format!("formatter exited with status {code}: {detail}"))
            }
        }
        Ok(Err(e)) => FormatOutcome::Failed(format!("formatter I/O error: {e}")),
        // Dropping the unfinished future drops the child, which kills it.
        Err(_) => FormatOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(formatter: &str, timeout_ms: u64, capture_mode: CaptureMode) -> Config {
        Config {
            port: 0,
            formatter_path: PathBuf::from(formatter),
            timeout_ms,
            capture_mode,
            sandbox_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            shutdown_grace_ms: 1_000,
        }
    }

    #[test]
    fn sanitize_strips_carriage_returns() {
        assert_eq!(sanitize("int x;\r\nint y;\r\n"), "int x;\nint y;\n");
        assert_eq!(sanitize("a\rb"), "ab\n");
    }

    #[test]
    fn sanitize_appends_exactly_one_terminator() {
        assert_eq!(sanitize("int x;"), "int x;\n");
        assert_eq!(sanitize("int x;\n"), "int x;\n");
        assert_eq!(sanitize("int x;\n\n\n"), "int x;\n");
    }

    #[test]
    fn sanitize_keeps_interior_blank_lines() {
        assert_eq!(sanitize("a\n\nb"), "a\n\nb\n");
    }

    #[test]
    fn sanitize_empty_and_terminator_only_input() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("\r\n\r\n"), "");
        assert_eq!(sanitize("\n\n"), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echo_formatter_returns_input_verbatim() {
        let config = test_config("/bin/cat", 5_000, CaptureMode::Stdout);
        match run_formatter(&config, "int x;\n").await {
            FormatOutcome::Succeeded(bytes) => assert_eq!(bytes, b"int x;\n"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_input_streams_without_deadlock() {
        // Several hundred KiB, well past the pipe buffers on both sides.
        let mut source = String::new();
        for i in 0..40_000 {
            source.push_str(&format!("int x{i};\n"));
        }
        let config = test_config("/bin/cat", 5_000, CaptureMode::Stdout);
        match run_formatter(&config, &source).await {
            FormatOutcome::Succeeded(bytes) => assert_eq!(bytes, source.as_bytes()),
            other => panic!("expected success for valid large input, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_classified_as_failure() {
        let config = test_config("/bin/false", 5_000, CaptureMode::Stdout);
        match run_formatter(&config, "int x;\n").await {
            FormatOutcome::Failed(msg) => assert!(msg.contains("exited"), "got: {msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_classified_as_failure() {
        let config = test_config("/nonexistent/formatter", 5_000, CaptureMode::Stdout);
        match run_formatter(&config, "int x;\n").await {
            FormatOutcome::Failed(msg) => assert!(msg.contains("spawn"), "got: {msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_overrun_is_classified_as_timeout() {
        // sh reads its script from stdin, so the submitted "source" makes
        // the child outlive the deadline.
        let config = test_config("/bin/sh", 100, CaptureMode::Stdout);
        match run_formatter(&config, "sleep 60\n").await {
            FormatOutcome::TimedOut => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_mode_excludes_stderr() {
        let config = test_config("/bin/sh", 5_000, CaptureMode::Stdout);
        match run_formatter(&config, "echo out; echo err >&2\n").await {
            FormatOutcome::Succeeded(bytes) => assert_eq!(bytes, b"out\n"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn combined_mode_appends_stderr() {
        let config = test_config("/bin/sh", 5_000, CaptureMode::Combined);
        match run_formatter(&config, "echo out; echo err >&2\n").await {
            FormatOutcome::Succeeded(bytes) => assert_eq!(bytes, b"out\nerr\n"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn truncate_output_caps_large_results() {
        let big = vec![b'x'; MAX_OUTPUT_SIZE + 10];
        let result = truncate_output(big);
        assert!(result.len() < MAX_OUTPUT_SIZE + 100);
        assert!(result.ends_with(b"... (output truncated)"));
    }

    #[test]
    fn truncate_output_passes_small_results_through() {
        assert_eq!(truncate_output(b"int x;\n".to_vec()), b"int x;\n");
    }
}
