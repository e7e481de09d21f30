//! The connection contract this crate sends commands over, and the wire-level command and reply
//! types exchanged across it.

use std::sync::atomic::{AtomicI32, Ordering};

use serde::de::DeserializeOwned;

use crate::{
    bson::{doc, Bson, Document, RawDocument, RawDocumentBuf, Timestamp},
    bson_util,
    client::session::{ClientSession, ClusterTime},
    error::{CommandError, Error, ErrorKind, Result},
    sdam::{Server, ServerAddress},
    selection_criteria::ReadPreference,
    trace::connection as trace,
    BoxFuture,
};

/// One leased transport to a specific server.
///
/// Connections are handed out by [`Server::connection`](crate::sdam::Server::connection) and
/// are closed exactly once by the dispatch layer when the round trip that leased them finishes.
pub trait Connection: Send + Sync {
    /// The address of the server this connection is established to.
    fn address(&self) -> &ServerAddress;

    /// Writes `command` to the server and reads back its reply.
    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<RawCommandResponse>>;

    /// Returns the connection to its pool.
    fn close(self: Box<Self>) -> Result<()>;
}

pub(crate) fn next_request_id() -> i32 {
    static REQUEST_ID: AtomicI32 = AtomicI32::new(0);
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// A server command containing all the information necessary to serialize it to a wire
/// message.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    target_db: String,
    body: Document,
    request_id: i32,
}

impl Command {
    /// Constructs a new command. The first key of `body` is expected to be `name`.
    pub(crate) fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            body,
            request_id: next_request_id(),
        }
    }

    /// The name of the command.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database the command runs against.
    pub fn target_db(&self) -> &str {
        &self.target_db
    }

    /// The command body, excluding `$db`.
    pub fn body(&self) -> &Document {
        &self.body
    }

    /// The id of the request carrying this command.
    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    /// The full document to send, including `$db`.
    pub fn to_document(&self) -> Document {
        let mut document = self.body.clone();
        document.insert("$db", self.target_db.clone());
        document
    }

    pub(crate) fn set_session(&mut self, session: &ClientSession) {
        self.body.insert("lsid", session.id().clone());
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) -> Result<()> {
        self.body
            .insert("$clusterTime", crate::bson::to_bson(cluster_time)?);
        Ok(())
    }

    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.body.insert("txnNumber", txn_number);
    }

    pub(crate) fn set_start_transaction(&mut self) {
        self.body.insert("startTransaction", true);
    }

    pub(crate) fn set_autocommit(&mut self) {
        self.body.insert("autocommit", false);
    }

    pub(crate) fn set_read_preference(&mut self, read_preference: &ReadPreference) -> Result<()> {
        self.body
            .insert("$readPreference", crate::bson::to_bson(read_preference)?);
        Ok(())
    }

    /// Adds `afterClusterTime` to the command's read concern, creating one if needed.
    pub(crate) fn set_after_cluster_time(&mut self, operation_time: Timestamp) {
        match self.body.get_mut("readConcern") {
            Some(Bson::Document(read_concern)) => {
                read_concern.insert("afterClusterTime", operation_time);
            }
            _ => {
                self.body
                    .insert("readConcern", doc! { "afterClusterTime": operation_time });
            }
        }
    }
}

/// A reply read back from a server.
#[derive(Debug, Clone)]
pub struct RawCommandResponse {
    source: ServerAddress,
    raw: RawDocumentBuf,
}

impl RawCommandResponse {
    /// Wraps the raw reply bytes read from `source`.
    pub fn new(source: ServerAddress, raw: RawDocumentBuf) -> Self {
        Self { source, raw }
    }

    /// Encodes `document` as a reply from `source`.
    pub fn with_document(source: ServerAddress, document: &Document) -> Result<Self> {
        let raw = RawDocumentBuf::from_document(document)?;
        Ok(Self { source, raw })
    }

    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_slice(self.raw.as_bytes()).map_err(|e| {
            Error::invalid_response(format!("{}", e))
        })
    }

    /// The raw reply document.
    pub fn raw_body(&self) -> &RawDocument {
        &self.raw
    }

    /// The address of the server that produced this reply.
    pub fn source_address(&self) -> &ServerAddress {
        &self.source
    }

    pub(crate) fn is_success(&self) -> bool {
        bson_util::is_ok_reply(&self.raw)
    }

    /// Converts an `ok: 0` reply into a command error carrying the reply's error labels.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        let command_error: CommandError = self.body().map_err(|_| {
            Error::invalid_response("command failed without a valid error code")
        })?;
        let labels: Vec<String> = match self.raw.get_array("errorLabels") {
            Ok(labels) => labels
                .into_iter()
                .filter_map(|label| label.ok().and_then(|l| l.as_str().map(String::from)))
                .collect(),
            Err(_) => Vec::new(),
        };
        Err(Error::new(ErrorKind::Command(command_error), Some(labels)).with_server_response(self))
    }

    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.raw
            .get_document("$clusterTime")
            .ok()
            .and_then(|doc| crate::bson::from_slice(doc.as_bytes()).ok())
    }

    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.raw.get_timestamp("operationTime").ok()
    }
}

/// A connection checked out for the duration of one round trip. The connection is closed when
/// the lease is dropped, whatever path the round trip took.
pub(crate) struct LeasedConnection {
    connection: Option<Box<dyn Connection>>,
    address: ServerAddress,
}

impl LeasedConnection {
    pub(crate) async fn check_out(server: &dyn Server) -> Result<Self> {
        let address = server.description().address;
        match server.connection().await {
            Ok(connection) => {
                trace::emit_checked_out(&address);
                Ok(Self {
                    connection: Some(connection),
                    address,
                })
            }
            Err(error) => {
                let error = Error::from(ErrorKind::ConnectionCheckout {
                    address: address.to_string(),
                    message: error.to_string(),
                })
                .with_source(error);
                trace::emit_checkout_failed(&address, &error);
                Err(error)
            }
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub(crate) async fn send_command(&mut self, command: Command) -> Result<RawCommandResponse> {
        match self.connection.as_mut() {
            Some(connection) => connection.send_command(command).await,
            None => Err(Error::internal("connection used after check-in")),
        }
    }
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            match connection.close() {
                Ok(()) => trace::emit_checked_in(&self.address),
                Err(error) => trace::emit_close_failed(&self.address, &error),
            }
        }
    }
}
