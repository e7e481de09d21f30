#![doc = include_str!("../README.md")]
#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
#![allow(
    clippy::unreadable_literal,
    clippy::match_like_matches_macro,
    clippy::derive_partial_eq_without_eq
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;
pub mod bundle;
mod bson_util;
pub mod change_stream;
mod client;
pub mod cmap;
mod coll;
mod collation;
mod cursor;
mod db;
pub mod error;
mod operation;
pub mod sdam;
mod selection_criteria;
mod serde_util;
mod trace;

pub use ::bson;

pub use crate::{
    bundle::{Bundle, BundleEntry, BundleOption, SessionRef},
    client::{session::ClientSession, Client},
    coll::Collection,
    cursor::Cursor,
    db::Database,
};

pub use client::session::ClusterTime;
pub use coll::Namespace;

/// A boxed future.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
