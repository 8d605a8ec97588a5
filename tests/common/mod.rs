//! Shared scripted stages and fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use reportweave::errors::ErrorKind;
use reportweave::stage::{Stage, StageCtx, StageError, StageInput, StageUpdate};

/// Shared invocation log so tests can assert scheduling order and attempt
/// counts across concurrently running stages.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &RunLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn append(log: &Option<RunLog>, stage: &str) {
    if let Some(log) = log {
        log.lock().unwrap().push(stage.to_string());
    }
}

/// Stage that emits one fixed value, optionally after a delay.
pub struct Emit {
    key: String,
    value: Value,
    delay: Option<Duration>,
    log: Option<RunLog>,
}

impl Emit {
    pub fn value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            delay: None,
            log: None,
        }
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn logged(mut self, log: &RunLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

#[async_trait]
impl Stage for Emit {
    async fn run(&self, _input: StageInput, ctx: StageCtx) -> Result<StageUpdate, StageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        append(&self.log, &ctx.stage);
        Ok(StageUpdate::new().with_value(&self.key, self.value.clone()))
    }
}

/// Stage that writes `{"attempt": n}` so revision tests can see which pass
/// produced the surviving value.
pub struct EmitAttempt {
    key: String,
    log: Option<RunLog>,
}

impl EmitAttempt {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            log: None,
        }
    }

    pub fn logged(mut self, log: &RunLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

#[async_trait]
impl Stage for EmitAttempt {
    async fn run(&self, _input: StageInput, ctx: StageCtx) -> Result<StageUpdate, StageError> {
        append(&self.log, &ctx.stage);
        Ok(StageUpdate::new().with_value(&self.key, json!({"attempt": ctx.attempt})))
    }
}

/// Stage that always fails with the configured error.
pub struct FailWith {
    error: StageError,
    delay: Option<Duration>,
    log: Option<RunLog>,
}

impl FailWith {
    pub fn recoverable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: StageError::recoverable(kind, message),
            delay: None,
            log: None,
        }
    }

    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: StageError::fatal(kind, message),
            delay: None,
            log: None,
        }
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn logged(mut self, log: &RunLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

#[async_trait]
impl Stage for FailWith {
    async fn run(&self, _input: StageInput, ctx: StageCtx) -> Result<StageUpdate, StageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        append(&self.log, &ctx.stage);
        Err(self.error.clone())
    }
}

/// Review stage that pops one scripted verdict per invocation and falls
/// back to a fixed verdict once the script runs out.
pub struct ScriptedReviewer {
    key: String,
    verdicts: Mutex<VecDeque<Value>>,
    fallback: Value,
    log: Option<RunLog>,
}

impl ScriptedReviewer {
    /// Scripted verdicts, accepting once the script is exhausted.
    pub fn new(key: impl Into<String>, verdicts: impl IntoIterator<Item = Value>) -> Self {
        Self {
            key: key.into(),
            verdicts: Mutex::new(verdicts.into_iter().collect()),
            fallback: json!({"verdict": "accept"}),
            log: None,
        }
    }

    /// Same verdict on every invocation.
    pub fn always(key: impl Into<String>, verdict: &str) -> Self {
        Self {
            key: key.into(),
            verdicts: Mutex::new(VecDeque::new()),
            fallback: json!({"verdict": verdict}),
            log: None,
        }
    }

    pub fn logged(mut self, log: &RunLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

#[async_trait]
impl Stage for ScriptedReviewer {
    async fn run(&self, _input: StageInput, ctx: StageCtx) -> Result<StageUpdate, StageError> {
        append(&self.log, &ctx.stage);
        let verdict = self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(StageUpdate::new().with_value(&self.key, verdict))
    }
}

/// Seed map builder.
pub fn seed(pairs: &[(&str, Value)]) -> FxHashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
