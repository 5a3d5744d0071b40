//! Key generation through the `wg` command line tool

use super::{KeyError, KeyPair, KeyProvider};
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tracing::debug;

pub struct WgKeyProvider {
    binary: String,
}

impl WgKeyProvider {
    pub fn new() -> Self {
        Self::with_binary("wg")
    }

    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn run(&self, command: &str, input: Option<&str>) -> Result<String, KeyError> {
        let spawn_error = |source: std::io::Error| KeyError::SpawnError {
            program: self.binary.clone(),
            source,
        };

        let mut child = Command::new(&self.binary)
            .arg(command)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).map_err(spawn_error)?;
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        self.check_output(command, output)
    }

    fn check_output(&self, command: &str, output: Output) -> Result<String, KeyError> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeyError::CommandFailed {
                program: self.binary.clone(),
                command: command.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let invalid = |reason: &str| KeyError::InvalidOutput {
            program: self.binary.clone(),
            command: command.to_string(),
            reason: reason.to_string(),
        };

        let stdout = String::from_utf8(output.stdout).map_err(|_| invalid("not UTF-8"))?;
        let key = stdout.trim();
        if key.is_empty() {
            return Err(invalid("empty output"));
        }
        Ok(key.to_string())
    }
}

impl Default for WgKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for WgKeyProvider {
    fn generate(&self) -> Result<KeyPair, KeyError> {
        let private = self.run("genkey", None)?;
        let public = self.derive_public(&private)?;
        debug!("Generated key pair via {}", self.binary);
        Ok(KeyPair { private, public })
    }

    fn derive_public(&self, private: &str) -> Result<String, KeyError> {
        self.run("pubkey", Some(private))
    }
}
