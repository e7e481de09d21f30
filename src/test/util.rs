//! A scripted in-memory deployment the dispatch layer can run against.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use crate::{
    bson::{doc, Document},
    cmap::{Command, Connection, RawCommandResponse},
    error::{Error, Result},
    options::ClientOptions,
    sdam::{Server, ServerAddress, ServerDescription, ServerType, Topology},
    selection_criteria::SelectionCriteria,
    BoxFuture,
    Client,
};

/// What a [`MockServer`] answers the next command with.
#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    Ok(Document),
    Err(Error),
    /// Never answers.
    Hang,
}

#[derive(Debug)]
struct MockServerState {
    description: ServerDescription,
    replies: Mutex<VecDeque<MockReply>>,
    commands: Mutex<Vec<Command>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_checkout: AtomicBool,
}

/// A server that answers commands from a script and records everything sent to it. Commands
/// sent after the script runs out are answered with `{ ok: 1 }`.
#[derive(Clone, Debug)]
pub(crate) struct MockServer {
    state: Arc<MockServerState>,
}

impl MockServer {
    pub(crate) fn new(description: ServerDescription) -> Self {
        Self {
            state: Arc::new(MockServerState {
                description,
                replies: Default::default(),
                commands: Default::default(),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                fail_checkout: AtomicBool::new(false),
            }),
        }
    }

    /// A replica set primary on a 7.0 server.
    pub(crate) fn primary(host: &str) -> Self {
        Self::of_type(host, ServerType::RsPrimary)
    }

    pub(crate) fn of_type(host: &str, server_type: ServerType) -> Self {
        Self::new(
            ServerDescription::new(ServerAddress::new(host, None), server_type)
                .with_max_wire_version(21)
                .with_logical_session_timeout(Duration::from_secs(30 * 60)),
        )
    }

    pub(crate) fn address(&self) -> ServerAddress {
        self.state.description.address.clone()
    }

    pub(crate) fn push_reply(&self, reply: MockReply) {
        self.lock_replies().push_back(reply);
    }

    pub(crate) fn push_ok(&self, reply: Document) {
        self.push_reply(MockReply::Ok(reply));
    }

    pub(crate) fn fail_checkouts(&self) {
        self.state.fail_checkout.store(true, Ordering::SeqCst);
    }

    /// Every command sent so far, in order.
    pub(crate) fn commands(&self) -> Vec<Command> {
        self.state.commands.lock().unwrap().clone()
    }

    pub(crate) fn command_names(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|command| command.name().to_string())
            .collect()
    }

    /// The most recently sent command.
    pub(crate) fn last_command(&self) -> Command {
        self.commands().pop().expect("no commands were sent")
    }

    pub(crate) fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<MockReply>> {
        self.state.replies.lock().unwrap()
    }
}

impl Server for MockServer {
    fn description(&self) -> ServerDescription {
        self.state.description.clone()
    }

    fn connection(&self) -> BoxFuture<'_, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            if self.state.fail_checkout.load(Ordering::SeqCst) {
                return Err(Error::network_timeout());
            }
            self.state.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                server: self.clone(),
            }) as Box<dyn Connection>)
        })
    }
}

struct MockConnection {
    server: MockServer,
}

impl Connection for MockConnection {
    fn address(&self) -> &ServerAddress {
        &self.server.state.description.address
    }

    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<RawCommandResponse>> {
        Box::pin(async move {
            self.server.state.commands.lock().unwrap().push(command);
            let reply = self
                .server
                .lock_replies()
                .pop_front()
                .unwrap_or_else(|| MockReply::Ok(doc! { "ok": 1 }));
            match reply {
                MockReply::Ok(document) => {
                    RawCommandResponse::with_document(self.server.address(), &document)
                }
                MockReply::Err(error) => Err(error),
                MockReply::Hang => std::future::pending().await,
            }
        })
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.server.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A deployment made of [`MockServer`]s. Selection waits forever when no server matches.
pub(crate) struct MockTopology {
    servers: Vec<MockServer>,
    supports_sessions: bool,
}

impl MockTopology {
    pub(crate) fn new(servers: impl IntoIterator<Item = MockServer>) -> Self {
        Self {
            servers: servers.into_iter().collect(),
            supports_sessions: true,
        }
    }

    pub(crate) fn without_sessions(mut self) -> Self {
        self.supports_sessions = false;
        self
    }

    /// A client over this topology that gives up on server selection quickly.
    pub(crate) fn into_client(self) -> Client {
        let options = ClientOptions::builder()
            .server_selection_timeout(Duration::from_millis(100))
            .build();
        self.into_client_with_options(options)
    }

    pub(crate) fn into_client_with_options(self, options: ClientOptions) -> Client {
        Client::with_topology(Arc::new(self), options)
    }
}

impl Topology for MockTopology {
    fn select_server<'a>(
        &'a self,
        criteria: &'a SelectionCriteria,
    ) -> BoxFuture<'a, Result<Arc<dyn Server>>> {
        Box::pin(async move {
            let server = self
                .servers
                .iter()
                .find(|server| criteria.is_suitable(&server.state.description));
            match server {
                Some(server) => Ok(Arc::new(server.clone()) as Arc<dyn Server>),
                None => std::future::pending().await,
            }
        })
    }

    fn supports_sessions(&self) -> bool {
        self.supports_sessions
    }

    fn logical_session_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30 * 60))
    }
}

/// The reply to a cursor-opening command.
pub(crate) fn cursor_reply(id: i64, ns: &str, first_batch: Vec<Document>) -> Document {
    doc! {
        "ok": 1,
        "cursor": { "id": id, "ns": ns, "firstBatch": first_batch },
    }
}

/// The reply to a `getMore`.
pub(crate) fn get_more_reply(id: i64, ns: &str, next_batch: Vec<Document>) -> Document {
    doc! {
        "ok": 1,
        "cursor": { "id": id, "ns": ns, "nextBatch": next_batch },
    }
}

/// A failed reply carrying `code` and `labels`.
pub(crate) fn command_error_reply(code: i32, labels: &[&str]) -> Document {
    doc! {
        "ok": 0,
        "code": code,
        "codeName": "MockError",
        "errmsg": "mock failure",
        "errorLabels": labels.iter().map(|label| label.to_string()).collect::<Vec<_>>(),
    }
}

/// Yields to the runtime until `condition` holds, failing the test after a second.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was never met");
}
