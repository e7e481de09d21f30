use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    bundle::{bundle_setters, Bundle, BundleOption},
    collation::Collation,
    error::{Error, Result},
    selection_criteria::SelectionCriteria,
    serde_util,
};

/// Specifies the index to use for an operation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// Specifies the keys of the index to use.
    Keys(Document),
    /// Specifies the name of the index to use.
    Name(String),
}

impl Hint {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            Hint::Keys(ref d) => Bson::Document(d.clone()),
            Hint::Name(ref s) => Bson::String(s.clone()),
        }
    }
}

impl From<Document> for Hint {
    fn from(keys: Document) -> Self {
        Hint::Keys(keys)
    }
}

impl From<&str> for Hint {
    fn from(name: &str) -> Self {
        Hint::Name(name.to_string())
    }
}

pub(crate) fn non_negative_u32(name: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::invalid_argument(format!("{} must be non-negative, got {}", name, value))
    })
}

pub(crate) fn non_negative_u64(name: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        Error::invalid_argument(format!("{} must be non-negative, got {}", name, value))
    })
}

/// These are the valid options for creating a [`Collection`](crate::Collection) with
/// [`Database::collection_with_options`](crate::Database::collection_with_options).
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CollectionOptions {
    /// The default read preference for operations.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a [`Collection::find_one`](crate::Collection::find_one) operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOneOptions {
    /// Return partial results from a sharded cluster when some shards are down instead of
    /// failing.
    pub allow_partial_results: Option<bool>,

    /// The number of documents the server returns in the first batch.
    #[serde(serialize_with = "serde_util::serialize_u32_option_as_i32")]
    pub batch_size: Option<u32>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary [`Bson`] value for the profiler and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The exclusive upper bound for a specific index.
    pub max: Option<Document>,

    /// The maximum amount of time to allow the query to run.
    ///
    /// This option maps to the `maxTimeMS` MongoDB query option, so the duration will be sent
    /// across the wire as an integer number of milliseconds.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The inclusive lower bound for a specific index.
    pub min: Option<Document>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// Whether to return only the index keys in the documents.
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    pub show_record_id: Option<bool>,

    /// The number of documents to skip before returning.
    #[serde(serialize_with = "serde_util::serialize_u64_option_as_i64")]
    pub skip: Option<u64>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// The criteria used to select a server for this operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An atomic option to [`Collection::find_one`](crate::Collection::find_one).
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum FindOneOption {
    #[display("allowPartialResults: {}", _0)]
    AllowPartialResults(bool),
    #[display("batchSize: {}", _0)]
    BatchSize(i32),
    #[display("collation: {:?}", _0)]
    Collation(Collation),
    #[display("comment: {}", _0)]
    Comment(Bson),
    #[display("hint: {:?}", _0)]
    Hint(Hint),
    #[display("max: {}", _0)]
    Max(Document),
    #[display("maxTimeMS: {:?}", _0)]
    MaxTime(Duration),
    #[display("min: {}", _0)]
    Min(Document),
    #[display("projection: {}", _0)]
    Projection(Document),
    #[display("returnKey: {}", _0)]
    ReturnKey(bool),
    #[display("showRecordId: {}", _0)]
    ShowRecordId(bool),
    #[display("skip: {}", _0)]
    Skip(i64),
    #[display("sort: {}", _0)]
    Sort(Document),
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for FindOneOption {
    type Options = FindOneOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::AllowPartialResults(_) => "allowPartialResults",
            Self::BatchSize(_) => "batchSize",
            Self::Collation(_) => "collation",
            Self::Comment(_) => "comment",
            Self::Hint(_) => "hint",
            Self::Max(_) => "max",
            Self::MaxTime(_) => "maxTimeMS",
            Self::Min(_) => "min",
            Self::Projection(_) => "projection",
            Self::ReturnKey(_) => "returnKey",
            Self::ShowRecordId(_) => "showRecordId",
            Self::Skip(_) => "skip",
            Self::Sort(_) => "sort",
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut FindOneOptions) -> Result<()> {
        match self {
            Self::AllowPartialResults(v) => options.allow_partial_results = Some(v),
            Self::BatchSize(v) => options.batch_size = Some(non_negative_u32("batchSize", v)?),
            Self::Collation(v) => options.collation = Some(v),
            Self::Comment(v) => options.comment = Some(v),
            Self::Hint(v) => options.hint = Some(v),
            Self::Max(v) => options.max = Some(v),
            Self::MaxTime(v) => options.max_time = Some(v),
            Self::Min(v) => options.min = Some(v),
            Self::Projection(v) => options.projection = Some(v),
            Self::ReturnKey(v) => options.return_key = Some(v),
            Self::ShowRecordId(v) => options.show_record_id = Some(v),
            Self::Skip(v) => options.skip = Some(non_negative_u64("skip", v)?),
            Self::Sort(v) => options.sort = Some(v),
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    FindOneOption;
    /// Appends an `allowPartialResults` option.
    allow_partial_results => AllowPartialResults(bool),
    /// Appends a `batchSize` option.
    batch_size => BatchSize(i32),
    /// Appends a `collation` option.
    collation => Collation(Collation),
    /// Appends a `comment` option.
    comment => Comment(Bson),
    /// Appends a `hint` option.
    hint => Hint(Hint),
    /// Appends a `max` option.
    max => Max(Document),
    /// Appends a `maxTimeMS` option.
    max_time => MaxTime(Duration),
    /// Appends a `min` option.
    min => Min(Document),
    /// Appends a `projection` option.
    projection => Projection(Document),
    /// Appends a `returnKey` option.
    return_key => ReturnKey(bool),
    /// Appends a `showRecordId` option.
    show_record_id => ShowRecordId(bool),
    /// Appends a `skip` option.
    skip => Skip(i64),
    /// Appends a `sort` option.
    sort => Sort(Document),
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`FindOneOption`]s.
pub type FindOneBundle = Bundle<FindOneOption>;

/// Specifies the options to a
/// [`Collection::count_documents`](crate::Collection::count_documents) operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CountOptions {
    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary [`Bson`] value for the profiler and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The number of documents to skip before counting.
    pub skip: Option<u64>,

    /// The criteria used to select a server for this operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An atomic option to [`Collection::count_documents`](crate::Collection::count_documents).
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum CountOption {
    #[display("collation: {:?}", _0)]
    Collation(Collation),
    #[display("comment: {}", _0)]
    Comment(Bson),
    #[display("hint: {:?}", _0)]
    Hint(Hint),
    #[display("limit: {}", _0)]
    Limit(i64),
    #[display("maxTimeMS: {:?}", _0)]
    MaxTime(Duration),
    #[display("skip: {}", _0)]
    Skip(i64),
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for CountOption {
    type Options = CountOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::Collation(_) => "collation",
            Self::Comment(_) => "comment",
            Self::Hint(_) => "hint",
            Self::Limit(_) => "limit",
            Self::MaxTime(_) => "maxTimeMS",
            Self::Skip(_) => "skip",
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut CountOptions) -> Result<()> {
        match self {
            Self::Collation(v) => options.collation = Some(v),
            Self::Comment(v) => options.comment = Some(v),
            Self::Hint(v) => options.hint = Some(v),
            Self::Limit(v) => options.limit = Some(non_negative_u64("limit", v)?),
            Self::MaxTime(v) => options.max_time = Some(v),
            Self::Skip(v) => options.skip = Some(non_negative_u64("skip", v)?),
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    CountOption;
    /// Appends a `collation` option.
    collation => Collation(Collation),
    /// Appends a `comment` option.
    comment => Comment(Bson),
    /// Appends a `hint` option.
    hint => Hint(Hint),
    /// Appends a `limit` option.
    limit => Limit(i64),
    /// Appends a `maxTimeMS` option.
    max_time => MaxTime(Duration),
    /// Appends a `skip` option.
    skip => Skip(i64),
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`CountOption`]s.
pub type CountBundle = Bundle<CountOption>;

/// Specifies the options to a
/// [`Collection::estimated_document_count`](crate::Collection::estimated_document_count)
/// operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct EstimatedDocumentCountOptions {
    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// Tags the query with an arbitrary [`Bson`] value for the profiler and logs.
    pub comment: Option<Bson>,

    /// The criteria used to select a server for this operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An atomic option to
/// [`Collection::estimated_document_count`](crate::Collection::estimated_document_count).
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum EstimatedCountOption {
    #[display("maxTimeMS: {:?}", _0)]
    MaxTime(Duration),
    #[display("comment: {}", _0)]
    Comment(Bson),
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for EstimatedCountOption {
    type Options = EstimatedDocumentCountOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::MaxTime(_) => "maxTimeMS",
            Self::Comment(_) => "comment",
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut EstimatedDocumentCountOptions) -> Result<()> {
        match self {
            Self::MaxTime(v) => options.max_time = Some(v),
            Self::Comment(v) => options.comment = Some(v),
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    EstimatedCountOption;
    /// Appends a `maxTimeMS` option.
    max_time => MaxTime(Duration),
    /// Appends a `comment` option.
    comment => Comment(Bson),
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`EstimatedCountOption`]s.
pub type EstimatedCountBundle = Bundle<EstimatedCountOption>;

/// Specifies the options to a [`Collection::distinct`](crate::Collection::distinct) operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DistinctOptions {
    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary [`Bson`] value for the profiler and logs.
    pub comment: Option<Bson>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The criteria used to select a server for this operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An atomic option to [`Collection::distinct`](crate::Collection::distinct).
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum DistinctOption {
    #[display("collation: {:?}", _0)]
    Collation(Collation),
    #[display("comment: {}", _0)]
    Comment(Bson),
    #[display("maxTimeMS: {:?}", _0)]
    MaxTime(Duration),
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for DistinctOption {
    type Options = DistinctOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::Collation(_) => "collation",
            Self::Comment(_) => "comment",
            Self::MaxTime(_) => "maxTimeMS",
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut DistinctOptions) -> Result<()> {
        match self {
            Self::Collation(v) => options.collation = Some(v),
            Self::Comment(v) => options.comment = Some(v),
            Self::MaxTime(v) => options.max_time = Some(v),
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    DistinctOption;
    /// Appends a `collation` option.
    collation => Collation(Collation),
    /// Appends a `comment` option.
    comment => Comment(Bson),
    /// Appends a `maxTimeMS` option.
    max_time => MaxTime(Duration),
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`DistinctOption`]s.
pub type DistinctBundle = Bundle<DistinctOption>;

/// Specifies the options to a [`Collection::aggregate`](crate::Collection::aggregate)
/// operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files by the server.
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    ///
    /// Sent inside the `cursor` subdocument of the command rather than at its top level.
    #[serde(skip_serializing)]
    pub batch_size: Option<u32>,

    /// Opt out of document-level validation for `$out` and `$merge` stages.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for the operation.
    pub collation: Option<Collation>,

    /// Tags the query with an arbitrary [`Bson`] value for the profiler and logs.
    pub comment: Option<Bson>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// Variables accessible anywhere in the pipeline via `$$name`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// How long a `getMore` on the resulting cursor waits for new documents. Sent as the
    /// `maxTimeMS` of each `getMore`.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// The criteria used to select a server for this operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An atomic option to [`Collection::aggregate`](crate::Collection::aggregate).
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum AggregateOption {
    #[display("allowDiskUse: {}", _0)]
    AllowDiskUse(bool),
    #[display("batchSize: {}", _0)]
    BatchSize(i32),
    #[display("bypassDocumentValidation: {}", _0)]
    BypassDocumentValidation(bool),
    #[display("collation: {:?}", _0)]
    Collation(Collation),
    #[display("comment: {}", _0)]
    Comment(Bson),
    #[display("hint: {:?}", _0)]
    Hint(Hint),
    #[display("let: {}", _0)]
    Let(Document),
    #[display("maxAwaitTimeMS: {:?}", _0)]
    MaxAwaitTime(Duration),
    #[display("maxTimeMS: {:?}", _0)]
    MaxTime(Duration),
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for AggregateOption {
    type Options = AggregateOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::AllowDiskUse(_) => "allowDiskUse",
            Self::BatchSize(_) => "batchSize",
            Self::BypassDocumentValidation(_) => "bypassDocumentValidation",
            Self::Collation(_) => "collation",
            Self::Comment(_) => "comment",
            Self::Hint(_) => "hint",
            Self::Let(_) => "let",
            Self::MaxAwaitTime(_) => "maxAwaitTimeMS",
            Self::MaxTime(_) => "maxTimeMS",
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut AggregateOptions) -> Result<()> {
        match self {
            Self::AllowDiskUse(v) => options.allow_disk_use = Some(v),
            Self::BatchSize(v) => options.batch_size = Some(non_negative_u32("batchSize", v)?),
            Self::BypassDocumentValidation(v) => options.bypass_document_validation = Some(v),
            Self::Collation(v) => options.collation = Some(v),
            Self::Comment(v) => options.comment = Some(v),
            Self::Hint(v) => options.hint = Some(v),
            Self::Let(v) => options.let_vars = Some(v),
            Self::MaxAwaitTime(v) => options.max_await_time = Some(v),
            Self::MaxTime(v) => options.max_time = Some(v),
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    AggregateOption;
    /// Appends an `allowDiskUse` option.
    allow_disk_use => AllowDiskUse(bool),
    /// Appends a `batchSize` option.
    batch_size => BatchSize(i32),
    /// Appends a `bypassDocumentValidation` option.
    bypass_document_validation => BypassDocumentValidation(bool),
    /// Appends a `collation` option.
    collation => Collation(Collation),
    /// Appends a `comment` option.
    comment => Comment(Bson),
    /// Appends a `hint` option.
    hint => Hint(Hint),
    /// Appends a `let` option.
    let_vars => Let(Document),
    /// Appends the `maxTimeMS` used by each `getMore`.
    max_await_time => MaxAwaitTime(Duration),
    /// Appends a `maxTimeMS` option.
    max_time => MaxTime(Duration),
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`AggregateOption`]s.
pub type AggregateBundle = Bundle<AggregateOption>;
