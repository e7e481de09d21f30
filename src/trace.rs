use crate::{
    bson::{Document, RawDocument},
    bson_util::truncate_on_char_boundary,
    error::Error,
    sdam::{ServerAddress, DEFAULT_PORT},
    selection_criteria::SelectionCriteria,
};

pub(crate) mod change_stream;
pub(crate) mod command;
pub(crate) mod connection;
pub(crate) mod server_selection;

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb_dispatch::command";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "mongodb_dispatch::connection";
pub(crate) const SERVER_SELECTION_TRACING_EVENT_TARGET: &str =
    "mongodb_dispatch::server_selection";
pub(crate) const CHANGE_STREAM_TRACING_EVENT_TARGET: &str = "mongodb_dispatch::change_stream";

pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for uuid::Uuid {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.hyphenated().to_string()
    }
}

impl TracingRepresentation for Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

impl TracingRepresentation for SelectionCriteria {
    type Representation = String;

    fn tracing_representation(&self) -> Self::Representation {
        self.to_string()
    }
}

impl ServerAddress {
    pub(crate) fn port_tracing_representation(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

pub(crate) fn serialize_command_or_reply(doc: &Document, max_length_bytes: usize) -> String {
    let mut rendered = doc.to_string();
    truncate_on_char_boundary(&mut rendered, max_length_bytes);
    rendered
}

/// Renders a raw reply, falling back to a placeholder when the bytes are not a valid document.
pub(crate) fn serialize_raw_reply(raw: &RawDocument, max_length_bytes: usize) -> String {
    match Document::try_from(raw) {
        Ok(doc) => serialize_command_or_reply(&doc, max_length_bytes),
        Err(_) => "<malformed document>".to_string(),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bson::{doc, RawDocumentBuf};

    #[test]
    fn long_documents_are_truncated() {
        let doc = doc! { "find": "x".repeat(50) };
        let rendered = serialize_command_or_reply(&doc, 10);
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.len(), 13);

        let short = serialize_command_or_reply(&doc! { "a": 1 }, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES);
        assert_eq!(short, doc! { "a": 1 }.to_string());
    }

    #[test]
    fn raw_replies_render_like_documents() {
        let raw = RawDocumentBuf::from_document(&doc! { "ok": 1 }).unwrap();
        assert_eq!(
            serialize_raw_reply(&raw, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES),
            doc! { "ok": 1 }.to_string()
        );
    }
}
