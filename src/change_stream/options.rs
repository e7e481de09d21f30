//! Contains options for ChangeStreams.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Timestamp},
    bundle::{bundle_setters, Bundle, BundleOption},
    change_stream::event::ResumeToken,
    coll::options::{non_negative_u32, AggregateOptions},
    collation::Collation,
    error::Result,
    selection_criteria::SelectionCriteria,
};

/// The options that can be passed to the `watch` methods that open a
/// [`ChangeStream`](crate::change_stream::ChangeStream).
///
/// Only the fields that belong in the `$changeStream` stage are serialized; the rest configure
/// the aggregate command and the cursor it returns.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Configures how the
    /// [`ChangeStreamEvent::full_document`](crate::change_stream::event::ChangeStreamEvent::full_document)
    /// field is populated.
    pub full_document: Option<FullDocumentType>,

    /// Resume after the event identified by this token.
    pub resume_after: Option<ResumeToken>,

    /// Only report changes at or after this operation time.
    pub start_at_operation_time: Option<Timestamp>,

    /// Like `resume_after`, but can also start after an invalidate event.
    pub start_after: Option<ResumeToken>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a change
    /// stream query.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The number of documents to return per batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// Specifies a collation.
    #[serde(skip)]
    pub collation: Option<Collation>,

    /// Tags the aggregate and its getMores for the profiler and logs.
    #[serde(skip)]
    pub comment: Option<Bson>,

    /// The criteria used to select a server for the aggregate.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

impl ChangeStreamOptions {
    pub(crate) fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions::builder()
            .batch_size(self.batch_size)
            .collation(self.collation.clone())
            .max_await_time(self.max_await_time)
            .selection_criteria(self.selection_criteria.clone())
            .comment(self.comment.clone())
            .build()
    }
}

/// Describes the modes for configuring the
/// [`ChangeStreamEvent::full_document`](crate::change_stream::event::ChangeStreamEvent::full_document)
/// field.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentType {
    /// Populate the field with the current majority-committed version of updated documents.
    UpdateLookup,

    /// Populate the field if a post-image is available.
    WhenAvailable,

    /// Like `WhenAvailable`, but fail if no post-image is available.
    Required,
}

/// An atomic option to a `watch` call.
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum ChangeStreamOption {
    #[display("batchSize: {}", _0)]
    BatchSize(i32),
    #[display("collation: {:?}", _0)]
    Collation(Collation),
    #[display("comment: {}", _0)]
    Comment(Bson),
    #[display("fullDocument: {:?}", _0)]
    FullDocument(FullDocumentType),
    #[display("maxAwaitTimeMS: {:?}", _0)]
    MaxAwaitTime(Duration),
    #[display("resumeAfter: {:?}", _0)]
    ResumeAfter(ResumeToken),
    #[display("startAfter: {:?}", _0)]
    StartAfter(ResumeToken),
    #[display("startAtOperationTime: {:?}", _0)]
    StartAtOperationTime(Timestamp),
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for ChangeStreamOption {
    type Options = ChangeStreamOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::BatchSize(_) => "batchSize",
            Self::Collation(_) => "collation",
            Self::Comment(_) => "comment",
            Self::FullDocument(_) => "fullDocument",
            Self::MaxAwaitTime(_) => "maxAwaitTimeMS",
            Self::ResumeAfter(_) => "resumeAfter",
            Self::StartAfter(_) => "startAfter",
            Self::StartAtOperationTime(_) => "startAtOperationTime",
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut ChangeStreamOptions) -> Result<()> {
        match self {
            Self::BatchSize(v) => options.batch_size = Some(non_negative_u32("batchSize", v)?),
            Self::Collation(v) => options.collation = Some(v),
            Self::Comment(v) => options.comment = Some(v),
            Self::FullDocument(v) => options.full_document = Some(v),
            Self::MaxAwaitTime(v) => options.max_await_time = Some(v),
            Self::ResumeAfter(v) => options.resume_after = Some(v),
            Self::StartAfter(v) => options.start_after = Some(v),
            Self::StartAtOperationTime(v) => options.start_at_operation_time = Some(v),
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    ChangeStreamOption;
    /// Appends a `batchSize` option.
    batch_size => BatchSize(i32),
    /// Appends a `collation` option.
    collation => Collation(Collation),
    /// Appends a `comment` option.
    comment => Comment(Bson),
    /// Appends a `fullDocument` option.
    full_document => FullDocument(FullDocumentType),
    /// Appends the `maxTimeMS` used by each `getMore`.
    max_await_time => MaxAwaitTime(Duration),
    /// Appends a `resumeAfter` option.
    resume_after => ResumeAfter(ResumeToken),
    /// Appends a `startAfter` option.
    start_after => StartAfter(ResumeToken),
    /// Appends a `startAtOperationTime` option.
    start_at_operation_time => StartAtOperationTime(Timestamp),
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`ChangeStreamOption`]s.
pub type ChangeStreamBundle = Bundle<ChangeStreamOption>;
