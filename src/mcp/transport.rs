use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{ConfabError, Result};

/// Bidirectional JSON message channel to a tool provider process.
///
/// Messages are whole JSON-RPC values; framing is the transport's concern.
#[async_trait]
pub trait ProviderTransport: Send {
    async fn send(&mut self, message: serde_json::Value) -> Result<()>;
    async fn receive(&mut self) -> Result<serde_json::Value>;
    async fn close(&mut self) -> Result<()>;
}

/// Stdio transport: spawns the provider as a child process and exchanges
/// newline-delimited JSON over its stdin/stdout.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    inner: Option<ChildChannel>,
    closed: bool,
}

struct ChildChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            inner: None,
            closed: false,
        }
    }

    pub fn from_command(command: impl Into<String>) -> Self {
        Self::new(command, Vec::new())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.closed {
            return Err(ConfabError::Transport("provider transport closed".into()));
        }
        if self.inner.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConfabError::Transport("provider stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConfabError::Transport("provider stdout unavailable".into()))?;
        self.inner = Some(ChildChannel {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        });
        Ok(())
    }

    fn inner_mut(&mut self) -> Result<&mut ChildChannel> {
        match self.inner.as_mut() {
            Some(inner) => Ok(inner),
            None => Err(ConfabError::Transport("provider transport unavailable".into())),
        }
    }
}

#[async_trait]
impl ProviderTransport for StdioTransport {
    async fn send(&mut self, message: serde_json::Value) -> Result<()> {
        self.ensure_connected()?;
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        let channel = self.inner_mut()?;
        channel.stdin.write_all(&line).await?;
        channel.stdin.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<serde_json::Value> {
        self.ensure_connected()?;
        let channel = self.inner_mut()?;
        loop {
            let line = channel
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| ConfabError::Transport("provider closed its stdout".into()))?;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(&line)?);
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut channel) = self.inner.take() {
            // Dropping stdin signals EOF; well-behaved providers exit on it.
            drop(channel.stdin);
            match channel.child.wait().await {
                Ok(_) => {}
                Err(_) => {
                    let _ = channel.child.kill().await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-process transport fed from a scripted response queue. Each `send`
    /// records the outgoing message; each `receive` pops the next script entry.
    pub struct ScriptedTransport {
        pub sent: Arc<Mutex<Vec<serde_json::Value>>>,
        responses: VecDeque<serde_json::Value>,
        closed: Arc<Mutex<u32>>,
    }

    impl ScriptedTransport {
        pub fn new(
            responses: Vec<serde_json::Value>,
        ) -> (Self, Arc<Mutex<Vec<serde_json::Value>>>, Arc<Mutex<u32>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(Mutex::new(0));
            (
                Self {
                    sent: Arc::clone(&sent),
                    responses: responses.into(),
                    closed: Arc::clone(&closed),
                },
                sent,
                closed,
            )
        }
    }

    #[async_trait]
    impl ProviderTransport for ScriptedTransport {
        async fn send(&mut self, message: serde_json::Value) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn receive(&mut self) -> Result<serde_json::Value> {
            self.responses
                .pop_front()
                .ok_or_else(|| ConfabError::Transport("provider closed its stdout".into()))
        }

        async fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() += 1;
            Ok(())
        }
    }
}
