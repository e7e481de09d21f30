use super::{TracingRepresentation, CONNECTION_TRACING_EVENT_TARGET};
use crate::{error::Error, sdam::ServerAddress};

pub(crate) fn emit_checked_out(address: &ServerAddress) {
    tracing::debug!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        serverHost = address.host.as_str(),
        serverPort = address.port_tracing_representation(),
        "Connection checked out",
    );
}

pub(crate) fn emit_checkout_failed(address: &ServerAddress, error: &Error) {
    tracing::debug!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        serverHost = address.host.as_str(),
        serverPort = address.port_tracing_representation(),
        error = error.tracing_representation(),
        "Connection checkout failed",
    );
}

pub(crate) fn emit_checked_in(address: &ServerAddress) {
    tracing::debug!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        serverHost = address.host.as_str(),
        serverPort = address.port_tracing_representation(),
        "Connection checked in",
    );
}

pub(crate) fn emit_close_failed(address: &ServerAddress, error: &Error) {
    tracing::warn!(
        target: CONNECTION_TRACING_EVENT_TARGET,
        serverHost = address.host.as_str(),
        serverPort = address.port_tracing_representation(),
        error = error.tracing_representation(),
        "Connection close failed",
    );
}
