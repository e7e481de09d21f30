mod executor;
pub mod options;
pub mod session;

use std::{sync::Arc, time::Duration};

use derive_where::derive_where;
use uuid::Uuid;

use crate::{
    bson::Document,
    bundle::Bundle,
    change_stream::{
        event::ChangeStreamEvent,
        options::ChangeStreamOption,
        ChangeStream,
        WatchArgs,
    },
    db::Database,
    error::{ErrorKind, Result},
    operation::{AggregateTarget, EndSessions},
    options::{ClientOptions, DatabaseOptions, SessionOptions},
    sdam::Topology,
    selection_criteria::SelectionCriteria,
    trace::command::CommandTracingEventEmitter,
    ClientSession,
};
use session::{ServerSession, ServerSessionPool};

/// The number of session ids sent in a single `endSessions` command.
const END_SESSIONS_BATCH_SIZE: usize = 10_000;

/// This is the entry point for dispatching operations. A `Client` wraps a [`Topology`] supplied
/// by the embedding driver and owns the pool of server sessions used against it.
///
/// `Client` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html) internally,
/// so it can safely be shared across threads or async tasks. For example:
///
/// ```rust,ignore
/// let client = Client::with_topology(topology, None);
///
/// for i in 0..5 {
///     let client_ref = client.clone();
///
///     tokio::task::spawn(async move {
///         let collection = client_ref
///             .database("items")
///             .collection::<Document>(&format!("coll{}", i));
///
///         // Do something with the collection
///     });
/// }
/// ```
///
/// ## Notes on performance
/// Create a single [`Client`] per deployment and share it; every clone refers to the same
/// session pool.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive_where(Debug)]
struct ClientInner {
    id: Uuid,
    #[derive_where(skip)]
    topology: Arc<dyn Topology>,
    options: ClientOptions,
    session_pool: ServerSessionPool,
    #[derive_where(skip)]
    command_emitter: CommandTracingEventEmitter,
}

impl Client {
    /// Creates a new `Client` that dispatches operations against `topology`.
    pub fn with_topology(
        topology: Arc<dyn Topology>,
        options: impl Into<Option<ClientOptions>>,
    ) -> Self {
        let options = options.into().unwrap_or_default();
        let id = Uuid::new_v4();
        let command_emitter =
            CommandTracingEventEmitter::new(options.tracing_max_document_length_bytes, id);
        Self {
            inner: Arc::new(ClientInner {
                id,
                topology,
                options,
                session_pool: ServerSessionPool::new(),
                command_emitter,
            }),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.inner.id
    }

    pub(crate) fn topology(&self) -> &dyn Topology {
        self.inner.topology.as_ref()
    }

    pub(crate) fn command_emitter(&self) -> &CommandTracingEventEmitter {
        &self.inner.command_emitter
    }

    /// The options this client was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Gets the default selection criteria the `Client` uses for operations.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.options.selection_criteria.as_ref()
    }

    /// Gets a handle to a database specified by `name` in the cluster the `Client` is connected to.
    /// The `Database` options (e.g. read preference) will default to those of the `Client`.
    ///
    /// This method does not send or receive anything across the wire to the database, so it can be
    /// used repeatedly without incurring any costs from I/O.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name, None)
    }

    /// Gets a handle to a database specified by `name` in the cluster the `Client` is connected to.
    /// Operations done with this `Database` will use the options specified by `options` by default
    /// and will otherwise default to those of the `Client`.
    ///
    /// This method does not send or receive anything across the wire to the database, so it can be
    /// used repeatedly without incurring any costs from I/O.
    pub fn database_with_options(&self, name: &str, options: DatabaseOptions) -> Database {
        Database::new(self.clone(), name, Some(options))
    }

    /// Starts a new [`ClientSession`].
    ///
    /// Fails with [`ErrorKind::SessionsNotSupported`] if the deployment does not support
    /// logical sessions.
    pub async fn start_session(
        &self,
        options: impl Into<Option<SessionOptions>>,
    ) -> Result<ClientSession> {
        if !self.inner.topology.supports_sessions() {
            return Err(ErrorKind::SessionsNotSupported.into());
        }
        Ok(ClientSession::new(
            self.check_out_server_session(),
            self.clone(),
            options.into(),
            false,
        ))
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in the cluster. The
    /// stream does not observe changes from system collections or the "config", "local" or
    /// "admin" databases.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams/) on change
    /// streams.
    pub async fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: Bundle<ChangeStreamOption>,
    ) -> Result<ChangeStream<ChangeStreamEvent<Document>>> {
        let (mut options, session) = options.resolve_options()?;
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria().cloned();
        }
        let args = WatchArgs {
            pipeline: pipeline.into_iter().collect(),
            target: AggregateTarget::Database("admin".to_string()),
            options: Some(options),
            all_changes_for_cluster: true,
        };
        self.execute_watch(args, session).await
    }

    /// Ends every server session currently pooled by this client, sending `endSessions` in
    /// batches to a primary-preferred server. Every batch is attempted; the first error
    /// encountered is returned.
    pub async fn end_all_sessions(&self) -> Result<()> {
        let session_ids = self.inner.session_pool.drain_ids();
        let mut first_error = None;
        for batch in session_ids.chunks(END_SESSIONS_BATCH_SIZE) {
            let end_sessions = EndSessions::new(batch.to_vec());
            if let Err(error) = self.execute_operation(end_sessions, None).await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// The logical session timeout reported by the deployment.
    pub(crate) fn logical_session_timeout(&self) -> Option<Duration> {
        self.inner.topology.logical_session_timeout()
    }

    /// Check in a server session to the server session pool. The session will be discarded if it
    /// is expired or dirty.
    pub(crate) fn check_in_server_session(&self, session: ServerSession) {
        self.inner
            .session_pool
            .check_in(session, self.logical_session_timeout());
    }

    /// Checks out a server session from the pool, creating one if none are usable.
    fn check_out_server_session(&self) -> ServerSession {
        self.inner
            .session_pool
            .check_out(self.logical_session_timeout())
    }

    /// Starts a session owned by the dispatch layer for a single operation.
    pub(crate) fn start_implicit_session(&self) -> ClientSession {
        ClientSession::new(self.check_out_server_session(), self.clone(), None, true)
    }

    #[cfg(test)]
    pub(crate) fn session_pool(&self) -> &ServerSessionPool {
        &self.inner.session_pool
    }
}
