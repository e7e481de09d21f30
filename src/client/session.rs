mod cluster_time;
mod pool;
#[cfg(test)]
mod test;

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp},
    error::{Error, ErrorKind, Result},
    operation::{AbortTransaction, CommitTransaction},
    options::{SessionOptions, TransactionOptions},
    selection_criteria::SelectionCriteria,
    Client,
};
pub use cluster_time::ClusterTime;
pub(super) use pool::ServerSessionPool;

/// A logical session used for ordering sequential operations. To create a `ClientSession`,
/// call [`Client::start_session`].
///
/// A session is either explicit, started by the caller who must end it, or implicit, started by
/// the dispatch layer for a single operation and ended when that operation completes. Ending a
/// session returns its server session to the client's pool; this happens exactly once, either
/// through [`ClientSession::end_session`] or when the session is dropped.
///
/// ## Transactions
/// A transaction is started with [`ClientSession::start_transaction`] and runs every operation
/// passed this session until [`ClientSession::commit_transaction`] or
/// [`ClientSession::abort_transaction`] is called. A session dropped with a transaction in
/// progress aborts it in the background.
///
/// ```rust,ignore
/// let mut session = client.start_session(None).await?;
/// session.start_transaction(None)?;
/// let session = SessionRef::new(session);
/// coll.count_documents(doc! {}, CountBundle::new().session(session.clone())).await?;
/// session.lock().await.commit_transaction().await?;
/// ```
#[derive(Debug)]
pub struct ClientSession {
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    server_session: ServerSession,
    client: Client,
    is_implicit: bool,
    ended: bool,
    options: Option<SessionOptions>,
    pub(crate) transaction: Transaction,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Transaction {
    pub(crate) state: TransactionState,
    pub(crate) options: Option<TransactionOptions>,
}

impl Transaction {
    pub(crate) fn start(&mut self, options: Option<TransactionOptions>) {
        self.state = TransactionState::Starting;
        self.options = options;
    }

    pub(crate) fn commit(&mut self, data_committed: bool) {
        self.state = TransactionState::Committed { data_committed };
    }

    pub(crate) fn abort(&mut self) {
        self.state = TransactionState::Aborted;
    }

    pub(crate) fn reset(&mut self) {
        self.state = TransactionState::None;
        self.options = None;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum TransactionState {
    #[default]
    None,
    Starting,
    InProgress,
    Committed {
        /// Whether any command ran in the transaction, which decides whether a repeated
        /// commit_transaction call has to reach the server.
        data_committed: bool,
    },
    Aborted,
}

impl ClientSession {
    pub(crate) fn new(
        server_session: ServerSession,
        client: Client,
        options: Option<SessionOptions>,
        is_implicit: bool,
    ) -> Self {
        Self {
            client,
            server_session,
            cluster_time: None,
            operation_time: None,
            is_implicit,
            ended: false,
            options,
            transaction: Default::default(),
        }
    }

    /// The client that started this session.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// The `lsid` document sent with this session's commands.
    pub fn id(&self) -> &Document {
        &self.server_session.id
    }

    /// Whether this session was created implicitly by the dispatch layer.
    pub(crate) fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    /// Whether this session has been ended.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Whether this session is currently in a transaction.
    pub(crate) fn in_transaction(&self) -> bool {
        matches!(
            self.transaction.state,
            TransactionState::Starting | TransactionState::InProgress
        )
    }

    /// The highest cluster time this session has seen so far.
    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The operation time of the latest reply this session has seen.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    /// Options given when the session was started.
    pub fn options(&self) -> Option<&SessionOptions> {
        self.options.as_ref()
    }

    /// Sets the cluster time to `to` if it is greater than this session's current cluster time.
    pub fn advance_cluster_time(&mut self, to: &ClusterTime) {
        if self.cluster_time().map(|ct| ct < to).unwrap_or(true) {
            self.cluster_time = Some(to.clone());
        }
    }

    /// Sets the operation time to `to` if it is later than this session's current operation
    /// time.
    pub fn advance_operation_time(&mut self, to: Timestamp) {
        let later = self
            .operation_time
            .map(|current| (current.time, current.increment) < (to.time, to.increment))
            .unwrap_or(true);
        if later {
            self.operation_time = Some(to);
        }
    }

    /// Whether reads in this session carry `afterClusterTime`.
    pub(crate) fn causal_consistency(&self) -> bool {
        !self.is_implicit
            && self
                .options
                .as_ref()
                .and_then(|options| options.causal_consistency)
                .unwrap_or(true)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.server_session.dirty = true;
    }

    pub(crate) fn update_last_use(&mut self) {
        self.server_session.last_use = Instant::now();
    }

    pub(crate) fn txn_number(&self) -> i64 {
        self.server_session.txn_number
    }

    pub(crate) fn increment_txn_number(&mut self) {
        self.server_session.txn_number += 1;
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.server_session.dirty
    }

    /// Returns this session's server session to the client's pool. Subsequent calls do nothing,
    /// and an ended session cannot be used for further operations.
    pub fn end_session(&mut self) {
        if !self.ended {
            self.ended = true;
            self.client
                .check_in_server_session(self.server_session.clone());
        }
    }

    /// The criteria every operation in the current transaction is routed by: the transaction's
    /// own read preference, else the session's default, else none (the primary).
    pub(crate) fn transaction_selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.transaction
            .options
            .as_ref()
            .and_then(|options| options.selection_criteria.as_ref())
            .or_else(|| {
                self.default_transaction_options()
                    .and_then(|options| options.selection_criteria.as_ref())
            })
    }

    /// Starts a new transaction on this session with the given `TransactionOptions`. Options not
    /// set fall back to the session's `default_transaction_options`. This session must be passed
    /// to each operation within the transaction; otherwise, the operation will be executed
    /// outside of the transaction.
    pub fn start_transaction(
        &mut self,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<()> {
        if self.ended {
            return Err(Error::invalid_argument(
                "cannot start a transaction on an ended session",
            ));
        }
        if self.in_transaction() {
            return Err(ErrorKind::Transaction {
                message: "transaction already in progress".into(),
            }
            .into());
        }

        let options = match options.into() {
            Some(mut options) => {
                if let Some(defaults) = self.default_transaction_options() {
                    if options.selection_criteria.is_none() {
                        options.selection_criteria = defaults.selection_criteria.clone();
                    }
                    if options.max_commit_time.is_none() {
                        options.max_commit_time = defaults.max_commit_time;
                    }
                }
                Some(options)
            }
            None => self.default_transaction_options().cloned(),
        };

        self.increment_txn_number();
        self.transaction.start(options);
        Ok(())
    }

    /// Commits the transaction that is currently active on this session.
    ///
    /// Committing a transaction in which no command ran succeeds without contacting the server.
    /// Calling this again after a commit re-sends the commit.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        let max_commit_time = self
            .transaction
            .options
            .as_ref()
            .and_then(|options| options.max_commit_time);
        match self.transaction.state {
            TransactionState::None => Err(ErrorKind::Transaction {
                message: "no transaction started".into(),
            }
            .into()),
            TransactionState::Aborted => Err(ErrorKind::Transaction {
                message: "Cannot call commitTransaction after calling abortTransaction".into(),
            }
            .into()),
            TransactionState::Starting => {
                self.transaction.commit(false);
                Ok(())
            }
            TransactionState::InProgress
            | TransactionState::Committed {
                data_committed: true,
            } => {
                self.transaction.commit(true);
                let commit_transaction = CommitTransaction::new(max_commit_time);
                self.client
                    .clone()
                    .execute_operation(commit_transaction, &mut *self)
                    .await
            }
            TransactionState::Committed {
                data_committed: false,
            } => Ok(()),
        }
    }

    /// Aborts the transaction that is currently active on this session. Errors returned by the
    /// server while aborting are ignored.
    pub async fn abort_transaction(&mut self) -> Result<()> {
        match self.transaction.state {
            TransactionState::None => Err(ErrorKind::Transaction {
                message: "no transaction started".into(),
            }
            .into()),
            TransactionState::Committed { .. } => Err(ErrorKind::Transaction {
                message: "Cannot call abortTransaction after calling commitTransaction".into(),
            }
            .into()),
            TransactionState::Aborted => Err(ErrorKind::Transaction {
                message: "cannot call abortTransaction twice".into(),
            }
            .into()),
            TransactionState::Starting => {
                self.transaction.abort();
                Ok(())
            }
            TransactionState::InProgress => {
                self.transaction.abort();
                let _result = self
                    .client
                    .clone()
                    .execute_operation(AbortTransaction::new(), &mut *self)
                    .await;
                Ok(())
            }
        }
    }

    fn default_transaction_options(&self) -> Option<&TransactionOptions> {
        self.options
            .as_ref()
            .and_then(|options| options.default_transaction_options.as_ref())
    }
}

struct DroppedClientSession {
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    server_session: ServerSession,
    client: Client,
    is_implicit: bool,
    options: Option<SessionOptions>,
    transaction: Transaction,
}

impl From<DroppedClientSession> for ClientSession {
    fn from(dropped_session: DroppedClientSession) -> Self {
        Self {
            cluster_time: dropped_session.cluster_time,
            operation_time: dropped_session.operation_time,
            server_session: dropped_session.server_session,
            client: dropped_session.client,
            is_implicit: dropped_session.is_implicit,
            ended: false,
            options: dropped_session.options,
            transaction: dropped_session.transaction,
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if self.transaction.state == TransactionState::InProgress {
            // The abort runs on a revived copy that checks the server session in when it is
            // dropped in turn.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let dropped_session = DroppedClientSession {
                    cluster_time: self.cluster_time.clone(),
                    operation_time: self.operation_time,
                    server_session: self.server_session.clone(),
                    client: self.client.clone(),
                    is_implicit: self.is_implicit,
                    options: self.options.clone(),
                    transaction: self.transaction.clone(),
                };
                self.ended = true;
                handle.spawn(async move {
                    let mut session: ClientSession = dropped_session.into();
                    let _result = session.abort_transaction().await;
                });
                return;
            }
        }
        self.end_session();
    }
}

/// The pooled, server-visible half of a session. One `ServerSession` backs many
/// `ClientSession`s in turn.
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    /// Sent as `lsid`.
    pub(crate) id: Document,

    /// Refreshed after each command.
    last_use: Instant,

    /// Set after a network error; dirty sessions are not pooled again.
    dirty: bool,

    /// Incremented for every transaction started.
    txn_number: i64,
}

impl ServerSession {
    /// A fresh session with a random UUID id.
    pub(crate) fn new() -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
            txn_number: 0,
        }
    }

    /// Whether this session expires within the next minute. Sessions never expire when the
    /// deployment reports no timeout.
    fn is_about_to_expire(&self, logical_session_timeout: Option<Duration>) -> bool {
        let timeout = match logical_session_timeout {
            Some(timeout) => timeout,
            None => return false,
        };
        let expiration_date = self.last_use + timeout;
        expiration_date < Instant::now() + Duration::from_secs(60)
    }
}
