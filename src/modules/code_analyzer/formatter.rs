//! Syntax checking and formatting through the `rustfmt` binary.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const MAX_WIDTH: usize = 88;

#[derive(Debug, Clone, PartialEq)]
pub struct Formatted {
    pub code: String,
    pub changed: bool,
}

#[derive(Debug, PartialEq)]
pub enum FormatError {
    Unavailable,
    Syntax(String),
    Io(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Unavailable => write!(f, "formatter is not installed"),
            FormatError::Syntax(e) => write!(f, "syntax error: {e}"),
            FormatError::Io(e) => write!(f, "formatter failed: {e}"),
        }
    }
}

impl std::error::Error for FormatError {}

#[async_trait]
pub trait CodeFormatter: Send + Sync {
    fn available(&self) -> bool;

    /// Format source. A syntax error is reported as `FormatError::Syntax`.
    async fn format(&self, code: &str) -> Result<Formatted, FormatError>;
}

pub struct Rustfmt {
    binary: String,
    available: bool,
}

impl Rustfmt {
    /// Probe the binary once. Missing binary disables formatting.
    pub fn detect(binary: &str) -> Self {
        let available = match std::process::Command::new(binary).arg("--version").output() {
            Ok(out) if out.status.success() => {
                info!("🦀 Found {}", String::from_utf8_lossy(&out.stdout).trim());
                true
            }
            Ok(out) => {
                warn!("{binary} --version failed: {}", String::from_utf8_lossy(&out.stderr).trim());
                false
            }
            Err(e) => {
                warn!("{binary} not available: {e}");
                false
            }
        };
        Self { binary: binary.to_string(), available }
    }

    async fn run(&self, source: &str) -> Result<String, FormatError> {
        let width = format!("max_width={MAX_WIDTH}");
        let mut child = tokio::process::Command::new(&self.binary)
            .args(["--edition", "2021", "--config", width.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FormatError::Io(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .await
                .map_err(|e| FormatError::Io(e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FormatError::Io(e.to_string()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("rustfmt stderr: {stderr}");
        Err(FormatError::Syntax(first_error(&stderr)))
    }
}

#[async_trait]
impl CodeFormatter for Rustfmt {
    fn available(&self) -> bool {
        self.available
    }

    async fn format(&self, code: &str) -> Result<Formatted, FormatError> {
        if !self.available {
            return Err(FormatError::Unavailable);
        }
        let formatted = match self.run(code).await {
            Ok(out) => out,
            // Statements are not valid at file level; retry inside a function body.
            Err(FormatError::Syntax(first)) => match self.run(&wrap_snippet(code)).await {
                Ok(out) => unwrap_snippet(&out).ok_or(FormatError::Syntax(first))?,
                Err(_) => return Err(FormatError::Syntax(first)),
            },
            Err(e) => return Err(e),
        };
        let changed = formatted.trim_end() != code.trim_end();
        Ok(Formatted { code: formatted, changed })
    }
}

const WRAP_OPEN: &str = "fn __snippet__() {";

fn wrap_snippet(code: &str) -> String {
    format!("{WRAP_OPEN}\n{code}\n}}\n")
}

/// Take the body back out of the wrapper and dedent it one level.
fn unwrap_snippet(formatted: &str) -> Option<String> {
    let body = formatted.trim().strip_prefix(WRAP_OPEN)?.strip_suffix('}')?;
    let lines: Vec<&str> = body
        .trim_matches('\n')
        .lines()
        .map(|l| l.strip_prefix("    ").unwrap_or(l))
        .collect();
    Some(format!("{}\n", lines.join("\n")))
}

/// The first `error...` line and the location line after it.
fn first_error(stderr: &str) -> String {
    let mut lines = stderr.lines().skip_while(|l| !l.starts_with("error"));
    match (lines.next(), lines.next()) {
        (Some(err), Some(loc)) => format!("{}\n{}", err.trim(), loc.trim()),
        (Some(err), None) => err.trim().to_string(),
        _ => stderr.lines().next().unwrap_or("unknown error").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_snippet_dedents() {
        let formatted = "fn __snippet__() {\n    let x = 1;\n    if x > 0 {\n        println!(\"{x}\");\n    }\n}\n";
        assert_eq!(
            unwrap_snippet(formatted).unwrap(),
            "let x = 1;\nif x > 0 {\n    println!(\"{x}\");\n}\n"
        );
        assert!(unwrap_snippet("fn other() {}").is_none());
    }

    #[test]
    fn test_first_error() {
        let stderr = "warning: something\nerror: expected `;`, found `}`\n --> <stdin>:1:10\n  |\n";
        assert_eq!(first_error(stderr), "error: expected `;`, found `}`\n--> <stdin>:1:10");
        assert_eq!(first_error("boom"), "boom");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let fmt = Rustfmt::detect("definitely-not-a-rustfmt-binary");
        assert!(!fmt.available());
        assert_eq!(fmt.format("fn main() {}").await, Err(FormatError::Unavailable));
    }

    #[cfg(feature = "integ_test")]
    #[tokio::test]
    async fn test_real_rustfmt() {
        let fmt = Rustfmt::detect("rustfmt");
        assert!(fmt.available());
        let out = fmt.format("fn main(){let x=1;}").await.unwrap();
        assert!(out.changed);
        assert!(out.code.contains("let x = 1;"));
        let out = fmt.format("let y=2;").await.unwrap();
        assert_eq!(out.code, "let y = 2;\n");
        assert!(matches!(fmt.format("fn main( {").await, Err(FormatError::Syntax(_))));
    }
}
