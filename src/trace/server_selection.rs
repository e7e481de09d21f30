use std::time::{Duration, Instant};

use uuid::Uuid;

use super::{TracingRepresentation, SERVER_SELECTION_TRACING_EVENT_TARGET};
use crate::{error::Error, sdam::ServerAddress, selection_criteria::SelectionCriteria};

/// Type responsible for emitting server selection tracing events.
pub(crate) struct ServerSelectionEventEmitter<'a> {
    client_id: Uuid,
    criteria: &'a SelectionCriteria,
    operation_name: &'a str,
    start_time: Instant,
    timeout: Duration,
}

impl ServerSelectionEventEmitter<'_> {
    pub(crate) fn new<'a>(
        client_id: Uuid,
        criteria: &'a SelectionCriteria,
        operation_name: &'a str,
        timeout: Duration,
    ) -> ServerSelectionEventEmitter<'a> {
        ServerSelectionEventEmitter::<'a> {
            client_id,
            criteria,
            operation_name,
            start_time: Instant::now(),
            timeout,
        }
    }

    pub(crate) fn emit_started_event(&self) {
        tracing::debug!(
            target: SERVER_SELECTION_TRACING_EVENT_TARGET,
            clientId = self.client_id.tracing_representation(),
            operation = self.operation_name,
            selector = self.criteria.tracing_representation(),
            timeoutMS = self.timeout.as_millis(),
            "Server selection started"
        );
    }

    pub(crate) fn emit_failed_event(&self, error: &Error) {
        tracing::debug!(
            target: SERVER_SELECTION_TRACING_EVENT_TARGET,
            clientId = self.client_id.tracing_representation(),
            operation = self.operation_name,
            selector = self.criteria.tracing_representation(),
            failure = error.tracing_representation(),
            durationMS = self.start_time.elapsed().as_millis(),
            "Server selection failed"
        );
    }

    pub(crate) fn emit_succeeded_event(&self, server_address: &ServerAddress) {
        tracing::debug!(
            target: SERVER_SELECTION_TRACING_EVENT_TARGET,
            clientId = self.client_id.tracing_representation(),
            operation = self.operation_name,
            selector = self.criteria.tracing_representation(),
            serverHost = server_address.host.as_str(),
            serverPort = server_address.port_tracing_representation(),
            durationMS = self.start_time.elapsed().as_millis(),
            "Server selection succeeded"
        );
    }
}
