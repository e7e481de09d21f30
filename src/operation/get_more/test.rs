use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, rawdoc, Bson},
    cursor::CursorInformation,
    operation::{
        test::{description, handle_response_test},
        GetMore,
        Operation,
    },
    sdam::{ServerAddress, ServerDescription, ServerType},
    Namespace,
};

fn info(batch_size: Option<u32>, max_time: Option<Duration>) -> CursorInformation {
    CursorInformation {
        ns: Namespace::new("test_db", "test_coll"),
        address: ServerAddress::new("localhost", None),
        id: 123,
        batch_size,
        max_time,
        comment: None,
    }
}

#[test]
fn build() {
    let mut op = GetMore::new(&info(Some(123), Some(Duration::from_millis(456))));

    let command = op.build(&description()).unwrap();
    assert_eq!(command.name(), "getMore");
    assert_eq!(command.target_db(), "test_db");
    assert_eq!(
        command.body(),
        &doc! {
            "getMore": 123_i64,
            "collection": "test_coll",
            "batchSize": 123,
            "maxTimeMS": 456,
        }
    );
}

#[test]
fn build_batch_size() {
    let mut op = GetMore::new(&info(Some(0), None));
    let command = op.build(&description()).unwrap();
    assert!(!command.body().contains_key("batchSize"));

    let mut op = GetMore::new(&info(Some(i32::MAX as u32 + 1), None));
    op.build(&description()).unwrap_err();
}

#[test]
fn build_comment() {
    let mut info = info(None, None);
    info.comment = Some(Bson::from("tag"));
    let mut op = GetMore::new(&info);

    let command = op.build(&description()).unwrap();
    assert_eq!(command.body().get_str("comment").unwrap(), "tag");
}

#[test]
fn op_selection_criteria() {
    let op = GetMore::new(&info(None, None));
    let criteria = op.selection_criteria().unwrap();

    assert!(criteria.is_suitable(&description()));
    let elsewhere = ServerDescription::new(
        ServerAddress::new("elsewhere", None),
        ServerType::RsPrimary,
    );
    assert!(!criteria.is_suitable(&elsewhere));
}

#[test]
fn handle_success() {
    let op = GetMore::new(&info(None, None));

    let response = doc! {
        "ok": 1,
        "cursor": {
            "id": 123_i64,
            "ns": "test_db.test_coll",
            "nextBatch": [{ "_id": 1 }, { "_id": 2 }],
            "postBatchResumeToken": { "_data": "abc" },
        },
    };
    let result = handle_response_test(&op, response).unwrap();
    assert!(!result.exhausted);
    assert_eq!(
        result.batch,
        vec![rawdoc! { "_id": 1 }, rawdoc! { "_id": 2 }]
    );
    assert!(result.post_batch_resume_token.is_some());

    let last = doc! {
        "ok": 1,
        "cursor": { "id": 0_i64, "ns": "test_db.test_coll", "nextBatch": [] },
    };
    let result = handle_response_test(&op, last).unwrap();
    assert!(result.exhausted);
    assert!(result.batch.is_empty());
    assert!(result.post_batch_resume_token.is_none());
}
