//! Job-level failure type and the taxonomy it maps onto.

use std::time::Duration;

use crate::delivery::DeliveryError;
use crate::extract::{ExtractErrorKind, SequenceError};
use crate::media::PostProcessError;
use crate::request::{Identity, RequestError};
use crate::workspace::InsufficientSpace;

/// Failure classes. `ExtractionRecoverable` is handled inside the sequencer
/// and only shows up in its logs; the rest reach the caller through `JobError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AdmissionRejected,
    ExtractionRecoverable,
    ExtractionTerminal,
    ResourceExhaustion,
    PostProcessTerminal,
    DeliveryTransient,
    DeliveryTerminal,
    Cancelled,
    Internal,
}

impl ErrorClass {
    pub fn for_engine(kind: ExtractErrorKind) -> Self {
        if kind.is_recoverable() {
            ErrorClass::ExtractionRecoverable
        } else {
            ErrorClass::ExtractionTerminal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::AdmissionRejected => "admission_rejected",
            ErrorClass::ExtractionRecoverable => "extraction_recoverable",
            ErrorClass::ExtractionTerminal => "extraction_terminal",
            ErrorClass::ResourceExhaustion => "resource_exhaustion",
            ErrorClass::PostProcessTerminal => "postprocess_terminal",
            ErrorClass::DeliveryTransient => "delivery_transient",
            ErrorClass::DeliveryTerminal => "delivery_terminal",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("a job for {0} is already running")]
    AdmissionRejected(Identity),
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
    #[error(transparent)]
    Extraction(#[from] SequenceError),
    #[error(transparent)]
    ResourceExhausted(#[from] InsufficientSpace),
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("job cancelled")]
    Cancelled,
    #[error("job exceeded its time limit of {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    pub fn class(&self) -> ErrorClass {
        match self {
            JobError::AdmissionRejected(_) => ErrorClass::AdmissionRejected,
            JobError::InvalidRequest(_) => ErrorClass::ExtractionTerminal,
            JobError::Extraction(_) => ErrorClass::ExtractionTerminal,
            JobError::ResourceExhausted(_) => ErrorClass::ResourceExhaustion,
            JobError::PostProcess(_) => ErrorClass::PostProcessTerminal,
            JobError::Delivery(e) if e.is_transient() => ErrorClass::DeliveryTransient,
            JobError::Delivery(_) => ErrorClass::DeliveryTerminal,
            JobError::Cancelled | JobError::TimedOut(_) => ErrorClass::Cancelled,
            JobError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether the remaining items of a batch should be skipped.
    pub fn stops_batch(&self) -> bool {
        match self {
            JobError::Extraction(e) => e
                .engine_error()
                .is_some_and(|err| matches!(err.kind, ExtractErrorKind::NoEntries | ExtractErrorKind::InvalidInput)),
            JobError::ResourceExhausted(_) | JobError::Cancelled | JobError::TimedOut(_) => true,
            _ => false,
        }
    }

    /// Text shown to the requester.
    pub fn user_message(&self) -> String {
        match self {
            JobError::AdmissionRejected(_) => {
                "⏳ You already have a download in progress. Please wait for it to finish.".to_string()
            }
            JobError::InvalidRequest(e) => format!("❌ Invalid request: {e}"),
            JobError::Extraction(e) => match e.engine_error().map(|err| err.kind) {
                Some(ExtractErrorKind::Blocked) => {
                    "🔒 This content is restricted (private, age or region gated). The bot may need updated cookies."
                        .to_string()
                }
                Some(ExtractErrorKind::Unsupported) => "❌ This site is not supported.".to_string(),
                Some(ExtractErrorKind::InvalidInput) => "❌ The link looks invalid.".to_string(),
                Some(ExtractErrorKind::NoEntries) => "❌ The playlist has no entry at this position.".to_string(),
                Some(ExtractErrorKind::FormatUnavailable) => {
                    "❌ No downloadable format is available in the requested quality.".to_string()
                }
                Some(ExtractErrorKind::Network) => "🌐 Network error while downloading. Please try again later.".to_string(),
                _ => "❌ Download failed.".to_string(),
            },
            JobError::ResourceExhausted(_) => "💾 The server is low on disk space. Please try again later.".to_string(),
            JobError::PostProcess(PostProcessError::UnknownDuration { .. }) => {
                "❌ The file is too large to send and could not be split.".to_string()
            }
            JobError::PostProcess(_) => "❌ Could not convert the downloaded file.".to_string(),
            JobError::Delivery(e) if e.is_transient() => {
                "⏳ The chat is rate limited. Please try again in a few minutes.".to_string()
            }
            JobError::Delivery(_) => "❌ Could not upload the file.".to_string(),
            JobError::Cancelled => "🛑 Download cancelled.".to_string(),
            JobError::TimedOut(_) => "⌛ Download took too long and was stopped.".to_string(),
            JobError::Internal(_) => "❌ Internal error.".to_string(),
        }
    }
}
