// src/host.rs
//! Host-side handle: start the engine now, collect its answer later.

use anyhow::{
    anyhow,
    Context,
    Result
};
use serde_json::Value;
use std::{
    io::{
        Read,
        Write
    },
    path::Path,
    process::{
        Child,
        ChildStderr,
        ChildStdout,
        Command,
        ExitStatus,
        Stdio
    },
    thread::{
        self,
        JoinHandle
    }
};
use tracing::debug;

use crate::{
    error::EngineError,
    protocol::Request
};

/// A running engine process. Output is drained on background threads, so
/// the engine never blocks on a full pipe while the host is busy elsewhere.
#[derive(Debug)]
pub struct EngineHandle {
    child: Child,
    stdout: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    stderr: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

impl EngineHandle {
    pub fn start(binary: &Path, request: &Request) -> Result<Self> {
        let json = serde_json::to_string(request).context("encoding request")?;
        Self::start_raw(binary, &[], &json)
    }

    /// Spawn `binary` with extra `args` and feed it `input` verbatim.
    pub fn start_raw(binary: &Path, args: &[&str], input: &str) -> Result<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", binary.display()))?;

        let stdout: ChildStdout = child.stdout.take().ok_or_else(|| anyhow!("engine stdout not captured"))?;
        let stderr: ChildStderr = child.stderr.take().ok_or_else(|| anyhow!("engine stderr not captured"))?;
        let mut handle = Self { stdout: Some(drain(stdout)), stderr: Some(drain(stderr)), child };

        // Dropping stdin closes the pipe; the engine reads to EOF.
        if let Some(mut stdin) = handle.child.stdin.take() {
            stdin.write_all(input.as_bytes()).context("writing request to engine")?;
        }
        debug!(pid = handle.child.id(), bytes = input.len(), "engine started");
        Ok(handle)
    }

    /// Block until the engine exits and decode its response.
    pub fn collect(mut self) -> Result<Value> {
        let status = self.child.wait().context("waiting for engine")?;
        self.finish(status)
    }

    /// `Ok(None)` while the engine is still running.
    pub fn try_collect(&mut self) -> Result<Option<Value>> {
        match self.child.try_wait().context("polling engine")? {
            Some(status) => self.finish(status).map(Some),
            None => Ok(None),
        }
    }

    fn finish(&mut self, status: ExitStatus) -> Result<Value> {
        let stdout = join(self.stdout.take())?;
        let stderr = join(self.stderr.take())?;
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

        if !status.success() {
            return Err(anyhow::Error::from(EngineError::EngineFailed { status: status.to_string(), stderr }));
        }
        serde_json::from_slice::<Value>(&stdout).map_err(|e| {
            anyhow::Error::from(EngineError::EngineFailed {
                status: status.to_string(),
                stderr: format!("malformed response: {e}"),
            })
        })
    }
}

fn join(handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    let handle = handle.ok_or_else(|| anyhow!("engine output already collected"))?;
    handle
        .join()
        .map_err(|_| anyhow!("engine output reader panicked"))?
        .context("reading engine output")
}
