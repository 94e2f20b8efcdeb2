//! Symbol demangling for optimization logs.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Turns mangled symbol names in a compiler log into readable ones.
#[async_trait]
pub trait Demangler: Send + Sync {
    async fn demangle(&self, text: &str) -> String;
}

/// Leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDemangler;

#[async_trait]
impl Demangler for NoopDemangler {
    async fn demangle(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Pipes text through an external filter such as `c++filt`.
///
/// Falls back to the original text when the filter is missing or fails,
/// so the log is always shown.
#[derive(Debug, Clone)]
pub struct CommandDemangler {
    program: String,
}

impl CommandDemangler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn filter(&self, text: &str) -> std::io::Result<String> {
        let mut child = tokio::process::Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for CommandDemangler {
    fn default() -> Self {
        Self::new("c++filt")
    }
}

#[async_trait]
impl Demangler for CommandDemangler {
    async fn demangle(&self, text: &str) -> String {
        match self.filter(text).await {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(program = %self.program, error = %e, "demangler unavailable");
                text.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop() {
        assert_eq!(NoopDemangler.demangle("_Z3foov").await, "_Z3foov");
    }

    #[tokio::test]
    async fn test_missing_filter_falls_back() {
        let demangler = CommandDemangler::new("no-such-demangler-binary");
        assert_eq!(demangler.demangle("_Z3foov\n").await, "_Z3foov\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_filter_output_is_used() {
        let demangler = CommandDemangler::new("cat");
        assert_eq!(demangler.demangle("kept as is\n").await, "kept as is\n");
    }
}
