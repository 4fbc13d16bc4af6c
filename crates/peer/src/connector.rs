use async_trait::async_trait;
use browsermux_core::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One open framed channel to a bridge. If it was obtained by spawning a
/// host process, the child lives as long as the channel and is killed when
/// the channel is dropped.
pub struct PeerChannel {
    pub reader: BoxReader,
    pub writer: BoxWriter,
    child: Option<Child>,
}

impl PeerChannel {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    pub fn into_parts(self) -> (BoxReader, BoxWriter, Option<Child>) {
        (self.reader, self.writer, self.child)
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<PeerChannel>;
}

/// Launches the native host the way a browser does: stdin/stdout become the
/// framed channel and the extension origin is the first argument.
pub struct ProcessConnector {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessConnector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_origin(mut self, peer_id: &str) -> Self {
        self.args.push(format!("chrome-extension://{}/", peer_id));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self) -> Result<PeerChannel> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::NotConnected(format!(
                "Failed to spawn host '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::NotConnected("host stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::NotConnected("host stdout unavailable".to_string()))?;

        info!(program = %self.program.display(), pid = ?child.id(), "Spawned native host");
        debug!(args = ?self.args, "Host arguments");

        Ok(PeerChannel {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_not_connected() {
        let connector = ProcessConnector::new("/nonexistent/browsermux-host-test");
        match connector.connect().await {
            Err(Error::NotConnected(msg)) => assert!(msg.contains("Failed to spawn host")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn test_origin_argument() {
        let connector = ProcessConnector::new("host").with_origin("abc").arg("--parent-window=0");
        assert_eq!(
            connector.args,
            vec!["chrome-extension://abc/".to_string(), "--parent-window=0".to_string()]
        );
    }
}
