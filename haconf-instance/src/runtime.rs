//! Runtime control channel of the running proxy.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RuntimeError;

/// Replies the proxy sends on success for `set server ... addr`.
const SUCCESS_REPLIES: &[&str] = &["IP changed from", "no need to change", "port changed from"];

/// Sends one line command to the running proxy and returns its reply.
pub trait RuntimeChannel: Send {
    fn send(&mut self, command: &str) -> Result<String, RuntimeError>;
}

/// Runtime API over a unix socket, one connection per command.
#[derive(Debug, Clone)]
pub struct UnixSocketRuntime {
    socket: PathBuf,
    timeout: Duration,
}

impl UnixSocketRuntime {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn io_err(&self, source: std::io::Error) -> RuntimeError {
        RuntimeError::Io {
            socket: self.socket.clone(),
            source,
        }
    }
}

impl RuntimeChannel for UnixSocketRuntime {
    fn send(&mut self, command: &str) -> Result<String, RuntimeError> {
        let mut stream = UnixStream::connect(&self.socket).map_err(|source| {
            RuntimeError::Connect {
                socket: self.socket.clone(),
                source,
            }
        })?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| self.io_err(e))?;
        stream
            .write_all(format!("{command}\n").as_bytes())
            .map_err(|e| self.io_err(e))?;
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| self.io_err(e))?;

        let mut reply = String::new();
        stream
            .read_to_string(&mut reply)
            .map_err(|e| self.io_err(e))?;

        if is_rejection(&reply) {
            return Err(RuntimeError::Rejected {
                command: command.to_string(),
                reply: reply.trim().to_string(),
            });
        }
        tracing::debug!(command, "runtime command accepted");
        Ok(reply)
    }
}

/// Anything other than silence or a known acknowledgement is an error.
pub fn is_rejection(reply: &str) -> bool {
    let reply = reply.trim();
    !reply.is_empty() && !SUCCESS_REPLIES.iter().any(|ok| reply.starts_with(ok))
}
