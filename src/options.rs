//! Contains all of the types needed to specify options to operations.
//!
//! Every operation takes a [`Bundle`](crate::Bundle) of its option family, for example
//! [`CountBundle`] for [`Collection::count_documents`](crate::Collection::count_documents).
//! Bundles resolve into the typed options structs below, most of which also derive a
//! [`typed-builder`](https://crates.io/crates/typed-builder) builder:
//!
//! ```rust
//! # use std::time::Duration;
//! # use mongodb_dispatch::options::AggregateOptions;
//! #
//! # let options = AggregateOptions::builder()
//! #                   .batch_size(20)
//! #                   .max_time(Duration::from_secs(5))
//! #                   .build();
//! ```

pub use crate::{
    change_stream::options::*,
    client::options::*,
    coll::options::*,
    collation::*,
    db::options::*,
    selection_criteria::*,
};
