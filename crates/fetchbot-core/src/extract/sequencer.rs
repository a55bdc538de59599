//! Ordered attempt chain with classified fallback.
//!
//! Strategies run in configuration order. A recoverable failure moves to the
//! next strategy after discarding that attempt's scratch directory; a terminal
//! failure stops the chain immediately.

use std::path::Path;

use super::{AttemptConfig, EngineError, ExtractRequest, ExtractionEngine, RawOutput};
use crate::error::ErrorClass;
use crate::progress::ProgressState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    NotStarted,
    /// 0-based index into the attempt list.
    TryingConfig(usize),
    Succeeded(usize),
    FailedTerminal(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("no extraction strategies configured")]
    NoAttempts,
    #[error("attempt {attempt} ({label}) failed: {source}")]
    Terminal {
        attempt: usize,
        label: String,
        #[source]
        source: EngineError,
    },
    #[error("all {attempts} attempts failed; last ({label}): {source}")]
    Exhausted {
        attempts: usize,
        label: String,
        #[source]
        source: EngineError,
    },
}

impl SequenceError {
    /// Engine error that ended the chain.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            SequenceError::NoAttempts => None,
            SequenceError::Terminal { source, .. } | SequenceError::Exhausted { source, .. } => {
                Some(source)
            }
        }
    }
}

#[derive(Debug)]
pub struct Resolved {
    pub output: RawOutput,
    /// 1-based attempt that produced the output.
    pub attempt: usize,
    pub label: String,
}

pub struct AttemptSequencer<'a> {
    engine: &'a dyn ExtractionEngine,
    state: SequencerState,
}

impl<'a> AttemptSequencer<'a> {
    pub fn new(engine: &'a dyn ExtractionEngine) -> Self {
        Self {
            engine,
            state: SequencerState::NotStarted,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run the chain for one item. Each attempt writes under `request.work_dir/attempt-N`.
    pub async fn resolve(
        &mut self,
        request: &ExtractRequest,
        configs: &[AttemptConfig],
        progress: &ProgressState,
    ) -> Result<Resolved, SequenceError> {
        let mut last: Option<(usize, String, EngineError)> = None;

        for (i, config) in configs.iter().enumerate() {
            self.state = SequencerState::TryingConfig(i);
            let attempt = i + 1;
            progress.begin_attempt(attempt as u32);

            let attempt_dir = request.work_dir.join(format!("attempt-{attempt}"));
            let result = match tokio::fs::create_dir_all(&attempt_dir).await {
                Ok(()) => {
                    let attempt_request = ExtractRequest {
                        work_dir: attempt_dir.clone(),
                        ..request.clone()
                    };
                    self.engine.extract(&attempt_request, config, progress).await
                }
                Err(e) => Err(EngineError::new(
                    super::ExtractErrorKind::Other,
                    format!("create {}: {e}", attempt_dir.display()),
                )),
            };

            match result {
                Ok(output) => {
                    self.state = SequencerState::Succeeded(i);
                    tracing::debug!(attempt, label = %config.label, path = %output.path.display(), "extraction succeeded");
                    return Ok(Resolved {
                        output,
                        attempt,
                        label: config.label.clone(),
                    });
                }
                Err(err) => {
                    discard_attempt(&attempt_dir).await;
                    let class = ErrorClass::for_engine(err.kind).as_str();
                    if !err.kind.is_recoverable() {
                        self.state = SequencerState::FailedTerminal(i);
                        tracing::warn!(attempt, label = %config.label, class, "terminal extraction failure: {}", err);
                        return Err(SequenceError::Terminal {
                            attempt,
                            label: config.label.clone(),
                            source: err,
                        });
                    }
                    tracing::info!(attempt, label = %config.label, class, "attempt failed, trying next: {}", err);
                    last = Some((i, config.label.clone(), err));
                }
            }
        }

        match last {
            Some((i, label, source)) => {
                self.state = SequencerState::FailedTerminal(i);
                Err(SequenceError::Exhausted {
                    attempts: configs.len(),
                    label,
                    source,
                })
            }
            None => Err(SequenceError::NoAttempts),
        }
    }
}

async fn discard_attempt(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), "could not remove abandoned attempt: {}", e),
    }
}
