pub mod options;

use std::sync::Arc;

use crate::{
    bson::Document,
    change_stream::{
        event::ChangeStreamEvent,
        options::ChangeStreamBundle,
        ChangeStream,
        WatchArgs,
    },
    coll::options::{AggregateBundle, CollectionOptions},
    error::Result,
    operation::{Aggregate, AggregateTarget, RunCommand},
    options::{DatabaseOptions, RunCommandBundle},
    selection_criteria::{ReadPreference, SelectionCriteria},
    Client,
    Collection,
    Cursor,
};

/// `Database` is the client-side abstraction of a MongoDB database. It can be used to dispatch
/// database-level operations or to obtain handles to specific collections within the database.
/// A `Database` can only be obtained through a [`Client`] by calling either
/// [`Client::database`] or [`Client::database_with_options`].
///
/// `Database` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html) internally,
/// so it can safely be shared across threads or async tasks. For example:
///
/// ```rust,ignore
/// let db = client.database("items");
///
/// for i in 0..5 {
///     let db_ref = db.clone();
///
///     tokio::task::spawn(async move {
///         let collection = db_ref.collection::<Document>(&format!("coll{}", i));
///
///         // Do something with the collection
///     });
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

#[derive(Debug)]
struct DatabaseInner {
    client: Client,
    name: String,
    selection_criteria: Option<SelectionCriteria>,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str, options: Option<DatabaseOptions>) -> Self {
        let options = options.unwrap_or_default();
        let selection_criteria = options
            .selection_criteria
            .or_else(|| client.selection_criteria().cloned());

        Self {
            inner: Arc::new(DatabaseInner {
                client,
                name: name.to_string(),
                selection_criteria,
            }),
        }
    }

    /// Get the `Client` that this collection descended from.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Gets the name of the `Database`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the read preference of the `Database`.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.selection_criteria.as_ref()
    }

    /// Gets a handle to a collection in this database with the provided name. The
    /// [`Collection`] options (e.g. read preference) will default to those of this
    /// [`Database`].
    ///
    /// This method does not send or receive anything across the wire to the database, so it can be
    /// used repeatedly without incurring any costs from I/O.
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        Collection::new(self.clone(), name, None)
    }

    /// Gets a handle to a collection in this database with the provided name.
    /// Operations done with this `Collection` will use the options specified by
    /// `options` and will otherwise default to those of this [`Database`].
    ///
    /// This method does not send or receive anything across the wire to the database, so it can be
    /// used repeatedly without incurring any costs from I/O.
    pub fn collection_with_options<T: Send + Sync>(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Collection<T> {
        Collection::new(self.clone(), name, Some(options))
    }

    /// Runs a database-level command.
    ///
    /// Note that no inspection is done on `command`, so the command will not use the database's
    /// default read preference; it runs on the primary unless a read preference is given in
    /// `options`. A reply with `ok: 0` is returned as a command error.
    pub async fn run_command(
        &self,
        command: Document,
        options: RunCommandBundle,
    ) -> Result<Document> {
        let (options, session) = options.resolve_options()?;
        let op = RunCommand::new(
            self.name().to_string(),
            command,
            options
                .selection_criteria
                .or_else(|| Some(ReadPreference::Primary.into())),
        )?;
        self.client()
            .execute_operation_in(op, session.as_ref())
            .await
    }

    /// Runs an aggregation operation against the database, for stages such as
    /// `$currentOp` that do not read from a collection.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/aggregation/) for more
    /// information on aggregations.
    pub async fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: AggregateBundle,
    ) -> Result<Cursor<Document>> {
        let (mut options, session) = options.resolve_options()?;
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria().cloned();
        }

        let op = Aggregate::new(
            AggregateTarget::Database(self.name().to_string()),
            pipeline,
            Some(options),
        );
        self.client().execute_cursor_operation(op, session).await
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in this database. The
    /// stream does not observe changes from system collections and cannot be started on
    /// "config", "local" or "admin" databases.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams/) on change
    /// streams.
    pub async fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: ChangeStreamBundle,
    ) -> Result<ChangeStream<ChangeStreamEvent<Document>>> {
        let (mut options, session) = options.resolve_options()?;
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria().cloned();
        }

        let args = WatchArgs {
            pipeline: pipeline.into_iter().collect(),
            target: AggregateTarget::Database(self.name().to_string()),
            options: Some(options),
            all_changes_for_cluster: false,
        };
        self.client().execute_watch(args, session).await
    }
}
