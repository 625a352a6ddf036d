// src/protocol.rs
//! One JSON request in, one JSON response out.
//!
//! The request is an object tagged by `command`. Decoding happens in two
//! steps so an unknown command is reported as such rather than as a generic
//! shape mismatch.

use serde::{
    Deserialize,
    Serialize
};
use serde_json::Value;
use std::time::Instant;
use tracing::{
    info,
    warn
};

use crate::{
    classmap::{
        self,
        ClassmapRequest
    },
    clean::{
        self,
        CleanTarget
    },
    config::EngineConfig,
    error::EngineError,
    extract::{
        self,
        ExtractionJob
    },
    util,
    vendor_check::{
        self,
        CheckPackage
    },
    verify::{
        self,
        VerifyTarget
    }
};

pub const COMMANDS: &[&str] = &["classmap", "clean", "verify", "vendor-check", "extract", "batch"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Request {
    Classmap(ClassmapRequest),
    Clean {
        #[serde(default)]
        targets: Vec<CleanTarget>,
    },
    Verify {
        #[serde(default)]
        verify_targets: Vec<VerifyTarget>,
    },
    VendorCheck {
        #[serde(default)]
        check_packages: Vec<CheckPackage>,
    },
    Extract {
        #[serde(default)]
        packages: Vec<ExtractionJob>,
    },
    /// Sub-requests stay undecoded so one malformed entry fails alone.
    Batch {
        #[serde(default)]
        requests: Vec<Value>,
    },
}

impl Request {
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let value: Value =
            serde_json::from_str(input).map_err(|e| EngineError::protocol(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        let command = match value.get("command") {
            Some(Value::String(c)) => c.clone(),
            Some(_) => return Err(EngineError::protocol("`command` must be a string")),
            None => return Err(EngineError::protocol("missing `command`")),
        };
        if !COMMANDS.contains(&command.as_str()) {
            return Err(EngineError::protocol(format!("unknown command: {command}")));
        }
        serde_json::from_value(value).map_err(|e| EngineError::protocol(format!("invalid {command} request: {e}")))
    }

    pub fn command(&self) -> &'static str {
        match self {
            Request::Classmap(_) => "classmap",
            Request::Clean { .. } => "clean",
            Request::Verify { .. } => "verify",
            Request::VendorCheck { .. } => "vendor-check",
            Request::Extract { .. } => "extract",
            Request::Batch { .. } => "batch",
        }
    }
}

/// Outcome of one batch entry: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchEntry>,
    pub elapsed_ms: u64,
}

fn encode<T: Serialize>(response: &T) -> Result<Value, EngineError> {
    serde_json::to_value(response).map_err(|e| EngineError::generation(format!("encoding response: {e}")))
}

/// Decode and execute one request document.
pub fn handle(input: &str, config: &EngineConfig) -> Result<Value, EngineError> {
    let request = Request::parse(input)?;
    dispatch(&request, config)
}

pub fn dispatch(request: &Request, config: &EngineConfig) -> Result<Value, EngineError> {
    let start = Instant::now();
    let response = match request {
        Request::Classmap(req) => encode(&classmap::run(req, config)?),
        Request::Clean { targets } => encode(&clean::run(targets)),
        Request::Verify { verify_targets } => encode(&verify::run(verify_targets)),
        Request::VendorCheck { check_packages } => encode(&vendor_check::run(check_packages)),
        Request::Extract { packages } => encode(&extract::run(packages)),
        Request::Batch { requests } => encode(&run_batch(requests, config)),
    }?;
    info!(command = request.command(), elapsed_ms = util::elapsed_ms(start), "command finished");
    Ok(response)
}

/// Sub-requests run in order; a failing one is recorded and the rest go on.
fn run_batch(requests: &[Value], config: &EngineConfig) -> BatchResponse {
    let start = Instant::now();
    let results = requests
        .iter()
        .map(|raw| {
            let command = raw.get("command").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let outcome = Request::from_value(raw.clone()).and_then(|req| match req {
                Request::Batch { .. } => Err(EngineError::protocol("batch requests cannot be nested")),
                other => dispatch(&other, config),
            });
            match outcome {
                Ok(result) => BatchEntry { command, result: Some(result), error: None },
                Err(e) => {
                    warn!(command = %command, error = %e, "batch entry failed");
                    BatchEntry { command, result: None, error: Some(e.to_string()) }
                }
            }
        })
        .collect();
    BatchResponse { results, elapsed_ms: util::elapsed_ms(start) }
}
