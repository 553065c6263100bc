use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// A credential supplied at run time; never printed, logged or serialized
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(******)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "******")
    }
}

/// Supplies redacted values at playback time
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Ask for the value labelled `field_label`; `None` means the user cancelled
    async fn request(&self, field_label: &str) -> Result<Option<Secret>>;
}

/// Reads credentials from the terminal
pub struct ConsolePrompt;

#[async_trait]
impl CredentialPrompt for ConsolePrompt {
    async fn request(&self, field_label: &str) -> Result<Option<Secret>> {
        use colored::Colorize;

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{} {}: ", "🔑".yellow(), field_label.bold()).as_bytes())
            .await?;
        stdout.flush().await?;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        let read = reader.read_line(&mut line).await?;

        let value = line.trim_end_matches(['\r', '\n']);
        if read == 0 || value.is_empty() {
            return Ok(None);
        }
        Ok(Some(Secret::new(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_masked() {
        let s = Secret::new("hunter2");
        assert_eq!(format!("{}", s), "******");
        assert!(!format!("{:?}", s).contains("hunter2"));
        assert_eq!(s.expose(), "hunter2");
    }
}
