use std::time::Duration;

use uuid::Uuid;

use crate::{
    bson::RawDocument,
    cmap::Command,
    error::Error,
    sdam::ServerAddress,
    trace::{
        serialize_command_or_reply,
        serialize_raw_reply,
        TracingRepresentation,
        COMMAND_TRACING_EVENT_TARGET,
        DEFAULT_MAX_DOCUMENT_LENGTH_BYTES,
    },
};

/// The lifecycle of one command round trip.
pub(crate) enum CommandEvent<'a> {
    Started {
        command: &'a Command,
        address: &'a ServerAddress,
    },
    Succeeded {
        command: &'a Command,
        address: &'a ServerAddress,
        reply: &'a RawDocument,
        duration: Duration,
    },
    Failed {
        command: &'a Command,
        address: &'a ServerAddress,
        failure: &'a Error,
        duration: Duration,
    },
}

/// Type responsible for converting command events into tracing events.
pub(crate) struct CommandTracingEventEmitter {
    max_document_length_bytes: usize,
    client_id: Uuid,
}

impl CommandTracingEventEmitter {
    pub(crate) fn new(
        max_document_length_bytes: Option<usize>,
        client_id: Uuid,
    ) -> CommandTracingEventEmitter {
        CommandTracingEventEmitter {
            max_document_length_bytes: max_document_length_bytes
                .unwrap_or(DEFAULT_MAX_DOCUMENT_LENGTH_BYTES),
            client_id,
        }
    }

    pub(crate) fn handle(&self, event: CommandEvent) {
        if !tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            return;
        }
        match event {
            CommandEvent::Started { command, address } => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    clientId = self.client_id.tracing_representation(),
                    command = serialize_command_or_reply(command.body(), self.max_document_length_bytes),
                    databaseName = command.target_db(),
                    commandName = command.name(),
                    requestId = command.request_id(),
                    serverHost = address.host.as_str(),
                    serverPort = address.port_tracing_representation(),
                    "Command started"
                );
            }
            CommandEvent::Succeeded {
                command,
                address,
                reply,
                duration,
            } => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    clientId = self.client_id.tracing_representation(),
                    reply = serialize_raw_reply(reply, self.max_document_length_bytes),
                    commandName = command.name(),
                    requestId = command.request_id(),
                    serverHost = address.host.as_str(),
                    serverPort = address.port_tracing_representation(),
                    durationMS = duration.as_millis(),
                    "Command succeeded"
                );
            }
            CommandEvent::Failed {
                command,
                address,
                failure,
                duration,
            } => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    clientId = self.client_id.tracing_representation(),
                    failure = failure.tracing_representation(),
                    commandName = command.name(),
                    requestId = command.request_id(),
                    serverHost = address.host.as_str(),
                    serverPort = address.port_tracing_representation(),
                    durationMS = duration.as_millis(),
                    "Command failed"
                );
            }
        }
    }
}
