use super::{TracingRepresentation, CHANGE_STREAM_TRACING_EVENT_TARGET};
use crate::error::Error;

pub(crate) fn emit_resume_attempt(target: &str, error: &Error, has_token: bool) {
    tracing::debug!(
        target: CHANGE_STREAM_TRACING_EVENT_TARGET,
        watchTarget = target,
        error = error.tracing_representation(),
        hasResumeToken = has_token,
        "Change stream resuming"
    );
}

pub(crate) fn emit_resumed(target: &str) {
    tracing::debug!(
        target: CHANGE_STREAM_TRACING_EVENT_TARGET,
        watchTarget = target,
        "Change stream resumed"
    );
}

pub(crate) fn emit_failed(target: &str, error: &Error) {
    tracing::debug!(
        target: CHANGE_STREAM_TRACING_EVENT_TARGET,
        watchTarget = target,
        error = error.tracing_representation(),
        "Change stream failed"
    );
}
