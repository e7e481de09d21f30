use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, rawdoc},
    operation::{
        test::{self, description, handle_response_test},
        FindOne,
        Operation,
    },
    options::FindOneOptions,
    Namespace,
};

fn ns() -> Namespace {
    Namespace::new("test_db", "test_coll")
}

#[test]
fn op_selection_criteria() {
    test::op_selection_criteria(|selection_criteria| {
        let options = FindOneOptions {
            selection_criteria,
            ..Default::default()
        };
        FindOne::new(ns(), doc! {}, Some(options))
    });
}

#[test]
fn build() {
    let options = FindOneOptions::builder()
        .projection(doc! { "x": 1 })
        .skip(3_u64)
        .max_time(Duration::from_millis(25))
        .build();
    let mut op = FindOne::new(ns(), doc! { "y": { "$gt": 2 } }, Some(options));

    let command = op.build(&description()).unwrap();
    assert_eq!(command.name(), "find");
    assert_eq!(command.target_db(), "test_db");
    assert_eq!(
        command.body(),
        &doc! {
            "find": "test_coll",
            "filter": { "y": { "$gt": 2 } },
            "maxTimeMS": 25,
            "projection": { "x": 1 },
            "skip": 3_i64,
            "limit": 1_i64,
            "singleBatch": true,
        }
    );
    assert!(op.supports_read_concern());
    assert!(!op.produces_cursor());
}

#[test]
fn handle_response() {
    let op = FindOne::new(ns(), doc! {}, None);

    let response = doc! {
        "ok": 1,
        "cursor": { "id": 0_i64, "ns": "test_db.test_coll", "firstBatch": [{ "_id": 5 }] },
    };
    assert_eq!(
        handle_response_test(&op, response).unwrap(),
        Some(rawdoc! { "_id": 5 })
    );

    let empty = doc! {
        "ok": 1,
        "cursor": { "id": 0_i64, "ns": "test_db.test_coll", "firstBatch": [] },
    };
    assert_eq!(handle_response_test(&op, empty).unwrap(), None);
}
