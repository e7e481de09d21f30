use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{ServerSession, ServerSessionPool, TransactionState};
use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Timestamp},
    error::ErrorKind,
    operation::Count,
    options::{SessionOptions, TransactionOptions},
    test::{command_error_reply, wait_until, MockServer, MockTopology},
    Client,
    ClientSession,
    Namespace,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(30 * 60));

fn setup() -> (MockServer, Client) {
    let server = MockServer::primary("a");
    let client = MockTopology::new([server.clone()]).into_client();
    (server, client)
}

/// Runs one command in `session` so that finishing its transaction reaches the server.
async fn run_in(server: &MockServer, client: &Client, session: &mut ClientSession) {
    server.push_ok(doc! { "ok": 1, "n": 0 });
    client
        .execute_operation(Count::new(Namespace::new("db", "coll"), None), session)
        .await
        .unwrap();
}

fn is_transaction_error(error: &crate::error::Error) -> bool {
    matches!(*error.kind, ErrorKind::Transaction { .. })
}

#[tokio::test]
async fn empty_transaction_commits_locally() {
    let (server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();

    session.start_transaction(None).unwrap();
    session.commit_transaction().await.unwrap();
    session.commit_transaction().await.unwrap();

    assert!(server.commands().is_empty());
    assert_eq!(
        session.transaction.state,
        TransactionState::Committed {
            data_committed: false
        }
    );
}

#[tokio::test]
async fn commit_reaches_the_server_and_can_be_repeated() {
    let (server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();
    session.start_transaction(None).unwrap();
    run_in(&server, &client, &mut session).await;

    session.commit_transaction().await.unwrap();
    session.commit_transaction().await.unwrap();

    assert_eq!(
        server.command_names(),
        vec!["count", "commitTransaction", "commitTransaction"]
    );
    for command in &server.commands()[1..] {
        assert_eq!(command.body().get_i64("txnNumber").unwrap(), 1);
        assert_eq!(command.body().get_document("lsid").unwrap(), session.id());
    }
}

#[tokio::test]
async fn abort_ignores_server_errors() {
    let (server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();
    session.start_transaction(None).unwrap();
    run_in(&server, &client, &mut session).await;

    server.push_ok(command_error_reply(251, &[]));
    session.abort_transaction().await.unwrap();

    assert_eq!(server.command_names(), vec!["count", "abortTransaction"]);
    assert_eq!(session.transaction.state, TransactionState::Aborted);
}

#[tokio::test]
async fn transaction_state_transitions_are_checked() {
    let (_server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();

    assert!(is_transaction_error(
        &session.commit_transaction().await.unwrap_err()
    ));
    assert!(is_transaction_error(
        &session.abort_transaction().await.unwrap_err()
    ));

    session.start_transaction(None).unwrap();
    assert!(is_transaction_error(
        &session.start_transaction(None).unwrap_err()
    ));

    session.commit_transaction().await.unwrap();
    assert!(is_transaction_error(
        &session.abort_transaction().await.unwrap_err()
    ));

    session.start_transaction(None).unwrap();
    session.abort_transaction().await.unwrap();
    assert!(is_transaction_error(
        &session.abort_transaction().await.unwrap_err()
    ));
    assert!(is_transaction_error(
        &session.commit_transaction().await.unwrap_err()
    ));
}

#[tokio::test]
async fn each_transaction_gets_a_new_number() {
    let (server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();

    for _ in 0..2 {
        session.start_transaction(None).unwrap();
        run_in(&server, &client, &mut session).await;
        session.commit_transaction().await.unwrap();
    }

    let numbers: Vec<i64> = server
        .commands()
        .iter()
        .map(|command| command.body().get_i64("txnNumber").unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 1, 2, 2]);
}

#[tokio::test]
async fn session_defaults_fill_transaction_options() {
    let (server, client) = setup();
    let defaults = TransactionOptions::builder()
        .max_commit_time(Duration::from_millis(250))
        .build();
    let options = SessionOptions::builder()
        .default_transaction_options(defaults)
        .build();
    let mut session = client.start_session(options).await.unwrap();

    session.start_transaction(TransactionOptions::default()).unwrap();
    run_in(&server, &client, &mut session).await;
    session.commit_transaction().await.unwrap();

    assert_eq!(
        server.last_command().body().get_i64("maxTimeMS").unwrap(),
        250
    );
}

#[tokio::test]
async fn ended_session_cannot_start_a_transaction() {
    let (_server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();
    session.end_session();
    session.end_session();

    assert!(session.has_ended());
    let error = session.start_transaction(None).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
    assert_eq!(client.session_pool().len(), 1);
}

#[tokio::test]
async fn dropping_a_session_mid_transaction_aborts_it() {
    let (server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();
    session.start_transaction(None).unwrap();
    run_in(&server, &client, &mut session).await;
    let id = session.id().clone();

    drop(session);

    wait_until(|| client.session_pool().contains(&id)).await;
    assert_eq!(server.command_names(), vec!["count", "abortTransaction"]);
}

#[tokio::test]
async fn operation_time_only_moves_forward() {
    let (_server, client) = setup();
    let mut session = client.start_session(None).await.unwrap();

    session.advance_operation_time(Timestamp {
        time: 5,
        increment: 2,
    });
    session.advance_operation_time(Timestamp {
        time: 5,
        increment: 1,
    });
    assert_eq!(
        session.operation_time(),
        Some(Timestamp {
            time: 5,
            increment: 2
        })
    );

    session.advance_operation_time(Timestamp {
        time: 6,
        increment: 0,
    });
    assert_eq!(
        session.operation_time(),
        Some(Timestamp {
            time: 6,
            increment: 0
        })
    );
}

#[test]
fn pool_is_lifo() {
    let pool = ServerSessionPool::new();
    let first = ServerSession::new();
    let second = ServerSession::new();
    let second_id = second.id.clone();

    pool.check_in(first, TIMEOUT);
    pool.check_in(second, TIMEOUT);
    assert_eq!(pool.len(), 2);

    assert_eq!(pool.check_out(TIMEOUT).id, second_id);
    assert_eq!(pool.len(), 1);
}

#[test]
fn pool_discards_dirty_and_expiring_sessions() {
    let pool = ServerSessionPool::new();

    let mut dirty = ServerSession::new();
    dirty.dirty = true;
    pool.check_in(dirty, TIMEOUT);
    assert_eq!(pool.len(), 0);

    // With less than a minute of lifetime, every session is about to expire.
    pool.check_in(ServerSession::new(), Some(Duration::from_secs(30)));
    assert_eq!(pool.len(), 0);

    pool.check_in(ServerSession::new(), None);
    assert_eq!(pool.len(), 1);

    let fresh = pool.check_out(Some(Duration::from_secs(30)));
    assert_eq!(pool.len(), 0);
    assert!(!fresh.dirty);
}

#[test]
fn new_server_sessions_have_uuid_ids() {
    let session = ServerSession::new();
    match session.id.get("id") {
        Some(Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes,
        })) => assert_eq!(bytes.len(), 16),
        other => panic!("expected a UUID binary id, got {:?}", other),
    }
    assert_ne!(session.id, ServerSession::new().id);
    assert_eq!(session.txn_number, 0);
}
