use std::{sync::Arc, time::Instant};

use serde::de::DeserializeOwned;

use super::{
    options::DEFAULT_SERVER_SELECTION_TIMEOUT,
    session::TransactionState,
    Client,
    ClientSession,
};
use crate::{
    bundle::SessionRef,
    change_stream::{ChangeStream, WatchArgs},
    cmap::LeasedConnection,
    cursor::{Cursor, CursorSession, CursorSpecification},
    error::{Error, ErrorKind, Result, TRANSIENT_TRANSACTION_ERROR},
    operation::{AbortTransaction, ChangeStreamAggregate, CommitTransaction, Operation},
    sdam::{Server, ServerDescription, ServerType},
    selection_criteria::{ReadPreference, SelectionCriteria},
    trace::{command::CommandEvent, server_selection::ServerSelectionEventEmitter},
};

/// The output of a dispatched operation, along with the implicit session it ran in when that
/// session has to outlive the round trip.
pub(crate) struct ExecutionDetails<T: Operation> {
    pub(crate) output: T::O,
    pub(crate) implicit_session: Option<ClientSession>,
}

impl Client {
    /// Execute the given operation.
    ///
    /// Server selection will performed using the criteria specified on the operation, if any, and
    /// an implicit session will be created if the operation and the deployment support sessions
    /// and an explicit session is not provided.
    pub(crate) async fn execute_operation<T: Operation>(
        &self,
        op: T,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<T::O> {
        self.execute_operation_with_details(op, session)
            .await
            .map(|details| details.output)
    }

    /// Execute the given operation in the session carried by an option bundle, if any.
    pub(crate) async fn execute_operation_in<T: Operation>(
        &self,
        op: T,
        session: Option<&SessionRef>,
    ) -> Result<T::O> {
        match session {
            Some(session) => {
                let mut session = session.lock().await;
                self.execute_operation(op, &mut *session).await
            }
            None => self.execute_operation(op, None).await,
        }
    }

    /// Execute an operation that opens a server cursor and wrap its output in a [`Cursor`] that
    /// owns the session the cursor must be iterated in.
    pub(crate) async fn execute_cursor_operation<Op, T>(
        &self,
        op: Op,
        session: Option<SessionRef>,
    ) -> Result<Cursor<T>>
    where
        Op: Operation<O = CursorSpecification>,
    {
        let (spec, session) = self
            .execute_with_cursor_session(op, session.map(CursorSession::Explicit))
            .await?;
        Ok(Cursor::new(self.clone(), spec, session))
    }

    pub(crate) async fn execute_watch<T>(
        &self,
        args: WatchArgs,
        session: Option<SessionRef>,
    ) -> Result<ChangeStream<T>>
    where
        T: DeserializeOwned,
    {
        let op = ChangeStreamAggregate::new(&args, None)?;
        let ((spec, data), cursor_session) = self
            .execute_with_cursor_session(op, session.clone().map(CursorSession::Explicit))
            .await?;
        let cursor = Cursor::new(self.clone(), spec, cursor_session);
        Ok(ChangeStream::new(self.clone(), cursor, args, data, session))
    }

    /// Executes `op` in the session a cursor is bound to, handing back the session the resulting
    /// cursor should be bound to. With no session, the implicit session created for `op` is
    /// handed back.
    pub(crate) async fn execute_with_cursor_session<Op: Operation>(
        &self,
        op: Op,
        session: Option<CursorSession>,
    ) -> Result<(Op::O, Option<CursorSession>)> {
        match session {
            Some(mut session) => {
                let output = self.execute_in_cursor_session(op, Some(&mut session)).await?;
                Ok((output, Some(session)))
            }
            None => {
                let details = self.execute_operation_with_details(op, None).await?;
                Ok((
                    details.output,
                    details.implicit_session.map(CursorSession::Implicit),
                ))
            }
        }
    }

    /// Executes `op` in the session an existing cursor is bound to without giving it up.
    pub(crate) async fn execute_in_cursor_session<Op: Operation>(
        &self,
        op: Op,
        session: Option<&mut CursorSession>,
    ) -> Result<Op::O> {
        match session {
            Some(CursorSession::Implicit(session)) => self.execute_operation(op, session).await,
            Some(CursorSession::Explicit(session)) => {
                self.execute_operation_in(op, Some(&*session)).await
            }
            None => self.execute_operation(op, None).await,
        }
    }

    /// Execute the given operation, returning the implicit session created for it if the
    /// operation produces a cursor.
    ///
    /// The connection is leased before the implicit session is started and released after the
    /// session is ended, on every path out of this function including cancellation.
    pub(crate) async fn execute_operation_with_details<T: Operation>(
        &self,
        mut op: T,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<ExecutionDetails<T>> {
        let mut session = session.into();

        if let Some(session) = session.as_deref_mut() {
            if session.client().id() != self.id() {
                return Err(Error::invalid_argument(
                    "the session provided to an operation must be created from the same client \
                     as the collection/database",
                ));
            }
            if session.has_ended() {
                return Err(Error::invalid_argument("cannot use an ended session"));
            }
            // A finished transaction is cleared by the next operation that is not finishing it.
            if matches!(
                session.transaction.state,
                TransactionState::Committed { .. } | TransactionState::Aborted
            ) && op.name() != CommitTransaction::NAME
                && op.name() != AbortTransaction::NAME
            {
                session.transaction.reset();
            }
        }
        if !op.supports_sessions() {
            session = None;
        }

        let in_transaction = session
            .as_deref()
            .map(ClientSession::in_transaction)
            .unwrap_or(false);
        let (criteria, read_preference) =
            self.resolve_selection_criteria(&op, session.as_deref())?;

        let server = match self.select_server(&criteria, op.name()).await {
            Ok(server) => server,
            Err(mut error) => {
                if in_transaction {
                    error.add_label(TRANSIENT_TRANSACTION_ERROR);
                }
                return Err(error);
            }
        };
        let description = server.description();
        let mut connection = LeasedConnection::check_out(server.as_ref()).await?;

        let mut implicit_session = if session.is_none()
            && op.supports_sessions()
            && self.topology().supports_sessions()
        {
            Some(self.start_implicit_session())
        } else {
            None
        };

        let governing_session = match session {
            Some(session) => Some(session),
            None => implicit_session.as_mut(),
        };
        let result = self
            .execute_on_connection(
                &mut op,
                &mut connection,
                &description,
                governing_session,
                read_preference.as_ref(),
            )
            .await;

        match result {
            Ok(output) => {
                let implicit_session = match implicit_session {
                    Some(session) if op.produces_cursor() => Some(session),
                    Some(mut session) => {
                        session.end_session();
                        None
                    }
                    None => None,
                };
                Ok(ExecutionDetails {
                    output,
                    implicit_session,
                })
            }
            Err(error) => {
                if let Some(mut session) = implicit_session {
                    session.end_session();
                }
                Err(error)
            }
        }
    }

    /// Determines the criteria to select a server by and the read preference to route the
    /// command with.
    ///
    /// Inside a transaction the transaction's read preference governs, and it must be the
    /// primary. Outside of one, the operation's criteria win over the client's default. A
    /// predicate on the operation always decides selection.
    fn resolve_selection_criteria<T: Operation>(
        &self,
        op: &T,
        session: Option<&ClientSession>,
    ) -> Result<(SelectionCriteria, Option<ReadPreference>)> {
        let op_criteria = op.selection_criteria();
        let read_preference = match session {
            Some(session) if session.in_transaction() => {
                match session.transaction_selection_criteria() {
                    None => ReadPreference::Primary,
                    Some(SelectionCriteria::ReadPreference(read_pref)) if read_pref.is_primary() => {
                        ReadPreference::Primary
                    }
                    Some(other) => {
                        return Err(ErrorKind::InvalidReadPreference {
                            message: format!(
                                "read preference in a transaction must be primary, got {}",
                                other
                            ),
                        }
                        .into())
                    }
                }
            }
            _ => match op_criteria.or_else(|| self.selection_criteria()) {
                Some(predicate @ SelectionCriteria::Predicate(_)) => {
                    return Ok((predicate.clone(), None));
                }
                Some(SelectionCriteria::ReadPreference(read_pref)) => read_pref.clone(),
                None => ReadPreference::Primary,
            },
        };

        let criteria = match op_criteria {
            Some(predicate @ SelectionCriteria::Predicate(_)) => predicate.clone(),
            _ => read_preference.clone().into(),
        };
        Ok((criteria, Some(read_preference)))
    }

    /// Selects a server matching `criteria`, giving up after the client's server selection
    /// timeout.
    async fn select_server(
        &self,
        criteria: &SelectionCriteria,
        operation_name: &str,
    ) -> Result<Arc<dyn Server>> {
        let timeout = self
            .options()
            .server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);
        let emitter = ServerSelectionEventEmitter::new(self.id(), criteria, operation_name, timeout);
        emitter.emit_started_event();

        let result = match tokio::time::timeout(timeout, self.topology().select_server(criteria))
            .await
        {
            Ok(Ok(server)) => Ok(server),
            Ok(Err(error)) if error.is_server_selection_error() => Err(error),
            Ok(Err(error)) => Err(Error::server_selection(format!(
                "Server selection failed for criteria {}: {}",
                criteria, error
            ))
            .with_source(error)),
            Err(_) => Err(Error::server_selection(format!(
                "Server selection timeout: No available servers matching {} after {:?}",
                criteria, timeout
            ))),
        };

        match result {
            Ok(ref server) => emitter.emit_succeeded_event(&server.description().address),
            Err(ref error) => emitter.emit_failed_event(error),
        }
        result
    }

    /// Runs one round trip of `op` over `connection`.
    async fn execute_on_connection<T: Operation>(
        &self,
        op: &mut T,
        connection: &mut LeasedConnection,
        description: &ServerDescription,
        mut session: Option<&mut ClientSession>,
        read_preference: Option<&ReadPreference>,
    ) -> Result<T::O> {
        let mut command = op.build(description)?;

        let mut in_transaction = false;
        if let Some(session) = session.as_deref_mut() {
            command.set_session(session);
            session.update_last_use();
            in_transaction = session.in_transaction();

            match session.transaction.state {
                TransactionState::Starting => {
                    command.set_start_transaction();
                    command.set_autocommit();
                    command.set_txn_number(session.txn_number());
                    session.transaction.state = TransactionState::InProgress;
                }
                TransactionState::InProgress
                | TransactionState::Committed { .. }
                | TransactionState::Aborted => {
                    command.set_autocommit();
                    command.set_txn_number(session.txn_number());
                }
                TransactionState::None => {
                    if session.causal_consistency() && op.supports_read_concern() {
                        if let Some(operation_time) = session.operation_time() {
                            command.set_after_cluster_time(operation_time);
                        }
                    }
                }
            }

            if let Some(cluster_time) = session.cluster_time() {
                command.set_cluster_time(cluster_time)?;
            }
        }

        if let Some(read_preference) = read_preference {
            if !read_preference.is_primary()
                && matches!(
                    description.server_type,
                    ServerType::Mongos | ServerType::LoadBalancer
                )
            {
                command.set_read_preference(read_preference)?;
            }
        }

        let address = connection.address().clone();
        let emitter = self.command_emitter();
        emitter.handle(CommandEvent::Started {
            command: &command,
            address: &address,
        });

        let start_time = Instant::now();
        let send_result = connection.send_command(command.clone()).await;
        let duration = start_time.elapsed();

        let response = match send_result {
            Ok(response) => response,
            Err(mut error) => {
                emitter.handle(CommandEvent::Failed {
                    command: &command,
                    address: &address,
                    failure: &error,
                    duration,
                });
                if error.is_network_error() {
                    if let Some(session) = session.as_deref_mut() {
                        session.mark_dirty();
                    }
                    if in_transaction {
                        error.add_label(TRANSIENT_TRANSACTION_ERROR);
                    }
                }
                return op.handle_error(error);
            }
        };

        if let Some(session) = session.as_deref_mut() {
            if let Some(cluster_time) = response.cluster_time() {
                session.advance_cluster_time(&cluster_time);
            }
            if let Some(operation_time) = response.operation_time() {
                session.advance_operation_time(operation_time);
            }
        }

        match response.validate() {
            Ok(()) => {
                emitter.handle(CommandEvent::Succeeded {
                    command: &command,
                    address: &address,
                    reply: response.raw_body(),
                    duration,
                });
                op.handle_response(response, description)
            }
            Err(error) => {
                emitter.handle(CommandEvent::Failed {
                    command: &command,
                    address: &address,
                    failure: &error,
                    duration,
                });
                op.handle_error(error)
            }
        }
    }
}
