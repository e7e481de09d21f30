use std::time::Duration;

use futures::TryStreamExt;
use pretty_assertions::assert_eq;

use super::CursorSession;
use crate::{
    bson::{doc, Bson, Document},
    error::ErrorCategory,
    options::AggregateBundle,
    test::{
        command_error_reply,
        cursor_reply,
        get_more_reply,
        wait_until,
        MockReply,
        MockServer,
        MockTopology,
    },
    Client,
    Collection,
    Cursor,
    SessionRef,
};

const NS: &str = "db.coll";

fn setup() -> (MockServer, Client, Collection<Document>) {
    let server = MockServer::primary("a");
    let client = MockTopology::new([server.clone()]).into_client();
    let coll = client.database("db").collection("coll");
    (server, client, coll)
}

fn docs(ids: impl IntoIterator<Item = i32>) -> Vec<Document> {
    ids.into_iter().map(|id| doc! { "_id": id }).collect()
}

async fn open(coll: &Collection<Document>) -> Cursor<Document> {
    coll.aggregate(vec![doc! { "$match": {} }], AggregateBundle::new())
        .await
        .unwrap()
}

fn lsids(server: &MockServer) -> Vec<Document> {
    server
        .commands()
        .iter()
        .map(|command| command.body().get_document("lsid").unwrap().clone())
        .collect()
}

#[tokio::test]
async fn iterates_across_batches() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, docs([1, 2])));
    server.push_ok(get_more_reply(42, NS, docs([3])));
    server.push_ok(get_more_reply(0, NS, docs([4])));

    let cursor = open(&coll).await;
    assert_eq!(cursor.id(), 42);
    assert_eq!(cursor.address(), &server.address());
    assert!(matches!(cursor.session(), Some(CursorSession::Implicit(_))));
    // The implicit session stays checked out while the cursor is alive.
    assert_eq!(client.session_pool().len(), 0);

    let results: Vec<Document> = cursor.into_stream().try_collect().await.unwrap();
    assert_eq!(results, docs([1, 2, 3, 4]));

    assert_eq!(
        server.command_names(),
        vec!["aggregate", "getMore", "getMore"]
    );
    let get_more = server.commands()[1].body().clone();
    assert_eq!(get_more.get_i64("getMore").unwrap(), 42);
    assert_eq!(get_more.get_str("collection").unwrap(), "coll");

    let ids = lsids(&server);
    assert!(ids.iter().all(|id| id == &ids[0]));
    assert_eq!(client.session_pool().len(), 1);
    assert!(client.session_pool().contains(&ids[0]));
}

#[tokio::test]
async fn advance_skips_empty_batches() {
    let (server, _client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, vec![]));
    server.push_ok(get_more_reply(42, NS, vec![]));
    server.push_ok(get_more_reply(0, NS, docs([1])));

    let mut cursor = open(&coll).await;
    assert!(cursor.advance().await.unwrap());
    assert_eq!(cursor.deserialize_current().unwrap(), doc! { "_id": 1 });
    assert!(cursor.is_exhausted());
    assert!(!cursor.advance().await.unwrap());
    assert!(cursor.current().is_none());
    assert_eq!(server.commands().len(), 3);
}

#[tokio::test]
async fn try_advance_issues_at_most_one_get_more() {
    let (server, _client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, vec![]));
    server.push_ok(get_more_reply(42, NS, vec![]));

    let mut cursor = open(&coll).await;
    assert!(!cursor.try_advance().await.unwrap());
    assert!(!cursor.is_exhausted());
    assert_eq!(server.command_names(), vec!["aggregate", "getMore"]);
}

#[tokio::test]
async fn exhausted_first_batch_releases_the_session() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(0, NS, docs([1])));

    let mut cursor = open(&coll).await;
    assert!(cursor.is_exhausted());
    assert!(cursor.session().is_none());
    assert_eq!(client.session_pool().len(), 1);

    assert!(cursor.advance().await.unwrap());
    assert!(!cursor.advance().await.unwrap());
    drop(cursor);

    tokio::task::yield_now().await;
    assert_eq!(server.command_names(), vec!["aggregate"]);
}

#[tokio::test]
async fn get_more_options_come_from_the_aggregate() {
    let (server, _client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, vec![]));
    server.push_ok(get_more_reply(0, NS, vec![]));

    let options = AggregateBundle::new()
        .batch_size(2)
        .max_await_time(Duration::from_millis(100))
        .comment("tagged");
    let mut cursor = coll.aggregate(vec![], options).await.unwrap();
    assert!(!cursor.advance().await.unwrap());

    let commands = server.commands();
    assert_eq!(
        commands[0].body().get_document("cursor").unwrap(),
        &doc! { "batchSize": 2 }
    );
    let get_more = commands[1].body();
    assert_eq!(get_more.get_i32("batchSize").unwrap(), 2);
    assert_eq!(get_more.get_i32("maxTimeMS").unwrap(), 100);
    assert_eq!(
        get_more.get("comment"),
        Some(&Bson::String("tagged".into()))
    );
}

#[tokio::test]
async fn dropping_a_live_cursor_kills_it() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, docs([1])));

    let cursor = open(&coll).await;
    drop(cursor);

    wait_until(|| client.session_pool().len() == 1).await;
    assert_eq!(server.command_names(), vec!["aggregate", "killCursors"]);

    let kill = server.last_command();
    assert_eq!(kill.target_db(), "db");
    assert_eq!(
        kill.body().get_str("killCursors").unwrap(),
        "coll"
    );
    assert_eq!(
        kill.body().get_array("cursors").unwrap(),
        &vec![Bson::Int64(42)]
    );
    let ids = lsids(&server);
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn close_kills_once() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, docs([1])));

    let cursor = open(&coll).await;
    cursor.close().await.unwrap();
    assert_eq!(client.session_pool().len(), 1);

    tokio::task::yield_now().await;
    assert_eq!(server.command_names(), vec!["aggregate", "killCursors"]);
}

#[tokio::test]
async fn get_more_failure_exhausts_the_cursor() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, vec![]));
    server.push_ok(command_error_reply(43, &[]));

    let mut cursor = open(&coll).await;
    let error = cursor.advance().await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Transport);
    assert!(cursor.is_exhausted());
    assert_eq!(client.session_pool().len(), 1);

    assert!(!cursor.advance().await.unwrap());
    drop(cursor);
    tokio::task::yield_now().await;
    assert_eq!(server.command_names(), vec!["aggregate", "getMore"]);
}

#[tokio::test]
async fn interrupted_get_more_is_reported() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, vec![]));
    server.push_reply(MockReply::Hang);

    let mut cursor = open(&coll).await;
    let interrupted =
        tokio::time::timeout(Duration::from_millis(50), cursor.advance()).await;
    assert!(interrupted.is_err());
    assert_eq!(server.closed(), 2);

    let error = cursor.advance().await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Transport);
    assert!(!cursor.is_exhausted());

    // The server may still hold the cursor, so dropping it kills it.
    drop(cursor);
    wait_until(|| client.session_pool().len() == 1).await;
    assert_eq!(
        server.command_names(),
        vec!["aggregate", "getMore", "killCursors"]
    );
}

#[tokio::test]
async fn explicit_session_is_borrowed_not_ended() {
    let (server, client, coll) = setup();
    server.push_ok(cursor_reply(42, NS, docs([1])));
    server.push_ok(get_more_reply(0, NS, docs([2])));

    let session = SessionRef::new(client.start_session(None).await.unwrap());
    let cursor = coll
        .aggregate(vec![], AggregateBundle::new().session(session.clone()))
        .await
        .unwrap();
    assert!(matches!(cursor.session(), Some(CursorSession::Explicit(_))));

    let results: Vec<Document> = cursor.into_stream().try_collect().await.unwrap();
    assert_eq!(results, docs([1, 2]));

    let session = session.lock().await;
    assert!(!session.has_ended());
    assert!(lsids(&server).iter().all(|id| id == session.id()));
    assert_eq!(client.session_pool().len(), 0);
}

#[tokio::test]
async fn deserialize_current_requires_a_position() {
    let (server, _client, coll) = setup();
    server.push_ok(cursor_reply(0, NS, docs([1])));

    let cursor = open(&coll).await;
    assert!(cursor.deserialize_current().is_err());

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Item {
        #[serde(rename = "_id")]
        id: i32,
    }
    let mut cursor = cursor.with_type::<Item>();
    assert!(cursor.advance().await.unwrap());
    assert_eq!(cursor.deserialize_current().unwrap(), Item { id: 1 });
}
