//! Shell Action Handler
//!
//! Collaborator for opaque `system` actions. The core hands over the
//! whole payload; this default handler runs its `command` field through
//! the platform shell and returns captured stdout.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::types::ShellActionHandler;

pub struct SystemShell;

#[async_trait]
impl ShellActionHandler for SystemShell {
    async fn handle(&self, payload: &serde_json::Map<String, Value>) -> Result<String> {
        let command = payload
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("System action carries no command"))?;

        info!("Shell command: {}", command);

        let output = if cfg!(windows) {
            tokio::process::Command::new("cmd")
                .args(["/C", command])
                .output()
                .await?
        } else {
            tokio::process::Command::new("sh")
                .args(["-c", command])
                .output()
                .await?
        };

        if !output.status.success() {
            bail!(
                "Command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_command_and_captures_stdout() {
        let mut payload = serde_json::Map::new();
        payload.insert("command".to_string(), Value::String("echo shell-ok".to_string()));

        let output = SystemShell.handle(&payload).await.unwrap();
        assert_eq!(output.trim(), "shell-ok");
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let payload = serde_json::Map::new();
        assert!(SystemShell.handle(&payload).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_command_reports_status() {
        let mut payload = serde_json::Map::new();
        payload.insert("command".to_string(), Value::String("exit 3".to_string()));

        let err = SystemShell.handle(&payload).await.unwrap_err();
        assert!(err.to_string().contains("exited"));
    }
}
