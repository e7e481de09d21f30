use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, RawBson},
    change_stream::{event::ResumeToken, WatchArgs},
    operation::{
        aggregate::{Aggregate, AggregateTarget},
        test::{self, description, handle_response_test, handle_response_test_with_wire_version},
        ChangeStreamAggregate,
        Operation,
    },
    options::{AggregateOptions, ChangeStreamOptions},
    Namespace,
};

fn ns() -> Namespace {
    Namespace::new("test_db", "test_coll")
}

fn cursor_response() -> crate::bson::Document {
    doc! {
        "ok": 1,
        "cursor": {
            "id": 123_i64,
            "ns": "test_db.test_coll",
            "firstBatch": [{ "_id": 1 }],
        }
    }
}

#[test]
fn op_selection_criteria() {
    test::op_selection_criteria(|selection_criteria| {
        let options = AggregateOptions {
            selection_criteria,
            ..Default::default()
        };
        Aggregate::new(ns(), Vec::new(), Some(options))
    });
}

#[test]
fn build() {
    let options = AggregateOptions::builder()
        .allow_disk_use(true)
        .batch_size(5_u32)
        .max_time(Duration::from_millis(20))
        .max_await_time(Duration::from_millis(300))
        .build();
    let mut op = Aggregate::new(ns(), vec![doc! { "$match": { "x": 1 } }], Some(options));

    let command = op.build(&description()).unwrap();
    assert_eq!(command.name(), "aggregate");
    assert_eq!(command.target_db(), "test_db");
    assert_eq!(
        command.body(),
        &doc! {
            "aggregate": "test_coll",
            "pipeline": [{ "$match": { "x": 1 } }],
            "cursor": { "batchSize": 5 },
            "allowDiskUse": true,
            "maxTimeMS": 20,
        }
    );
}

#[test]
fn build_database_target() {
    let mut op = Aggregate::new(
        AggregateTarget::Database("admin".to_string()),
        vec![doc! { "$currentOp": {} }],
        None,
    );

    let command = op.build(&description()).unwrap();
    assert_eq!(command.target_db(), "admin");
    assert_eq!(command.body().get("aggregate"), Some(&Bson::Int32(1)));
    assert_eq!(command.body().get_document("cursor").unwrap(), &doc! {});
}

#[test]
fn handle_response() {
    let options = AggregateOptions::builder()
        .batch_size(5_u32)
        .max_await_time(Duration::from_millis(300))
        .comment(Bson::from("tag"))
        .build();
    let op = Aggregate::new(ns(), Vec::new(), Some(options));

    let spec = handle_response_test(&op, cursor_response()).unwrap();
    assert_eq!(spec.id(), 123);
    assert_eq!(spec.info.ns, ns());
    assert_eq!(spec.info.batch_size, Some(5));
    assert_eq!(spec.info.max_time, Some(Duration::from_millis(300)));
    assert_eq!(spec.info.comment, Some(Bson::from("tag")));
    assert_eq!(spec.initial_buffer.len(), 1);
    assert!(op.produces_cursor());
}

#[test]
fn comment_is_only_forwarded_to_servers_that_accept_it() {
    let options = AggregateOptions::builder().comment(Bson::from("tag")).build();
    let op = Aggregate::new(ns(), Vec::new(), Some(options));

    // 4.2 servers reject a comment on getMore.
    let spec = handle_response_test_with_wire_version(&op, cursor_response(), 8).unwrap();
    assert_eq!(spec.info.comment, None);
}

#[test]
fn handle_invalid_response() {
    let op = Aggregate::new(ns(), Vec::new(), None);

    let garbled = doc! { "ok": 1, "asdfasf": "ASdfasdf" };
    handle_response_test(&op, garbled).unwrap_err();

    let missing_cursor_id = doc! {
        "ok": 1,
        "cursor": {
            "ns": "test.test",
            "firstBatch": [],
        }
    };
    handle_response_test(&op, missing_cursor_id).unwrap_err();
}

fn watch_args(options: ChangeStreamOptions) -> WatchArgs {
    WatchArgs {
        pipeline: vec![doc! { "$project": { "x": 1 } }],
        target: ns().into(),
        options: Some(options),
        all_changes_for_cluster: false,
    }
}

#[test]
fn change_stream_stage_leads_the_pipeline() {
    let options = ChangeStreamOptions::builder().batch_size(3_u32).build();
    let mut op = ChangeStreamAggregate::new(&watch_args(options), None).unwrap();

    let command = op.build(&description()).unwrap();
    assert_eq!(
        command.body().get_array("pipeline").unwrap(),
        &vec![
            Bson::Document(doc! { "$changeStream": {} }),
            Bson::Document(doc! { "$project": { "x": 1 } }),
        ]
    );
    assert_eq!(
        command.body().get_document("cursor").unwrap(),
        &doc! { "batchSize": 3 }
    );
}

#[test]
fn change_stream_records_the_initial_operation_time() {
    let mut op = ChangeStreamAggregate::new(&watch_args(Default::default()), None).unwrap();
    let time = crate::bson::Timestamp {
        time: 12,
        increment: 3,
    };
    let response = doc! {
        "ok": 1,
        "cursor": { "id": 5_i64, "ns": "test_db.test_coll", "firstBatch": [] },
        "operationTime": time,
    };

    op.build(&description()).unwrap();
    let (_, data) = handle_response_test(&op, response.clone()).unwrap();
    assert_eq!(data.initial_operation_time, Some(time));
    assert_eq!(data.resume_token, None);

    // An explicit start point takes precedence.
    let token = ResumeToken(RawBson::String("t".to_string()));
    let options = ChangeStreamOptions::builder()
        .resume_after(token.clone())
        .build();
    let op = ChangeStreamAggregate::new(&watch_args(options), None).unwrap();
    let (_, data) = handle_response_test(&op, response).unwrap();
    assert_eq!(data.initial_operation_time, None);
    assert_eq!(data.resume_token, Some(token));
}
