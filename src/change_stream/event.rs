//! Contains the types related to a `ChangeStream` event.

use serde::{Deserialize, Serialize};

use crate::bson::{Document, RawBson, RawBsonRef, Timestamp};

/// An opaque token marking a position in a change stream.
///
/// Tokens can be passed back as
/// [`ChangeStreamOptions::resume_after`](crate::options::ChangeStreamOptions::resume_after) or
/// [`ChangeStreamOptions::start_after`](crate::options::ChangeStreamOptions::start_after) to
/// open a new stream where an old one left off. See the documentation
/// [here](https://www.mongodb.com/docs/manual/changeStreams/#resume-a-change-stream) for more
/// information.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ResumeToken(pub(crate) RawBson);

impl ResumeToken {
    pub(crate) fn from_raw(raw: RawBsonRef<'_>) -> Self {
        Self(raw.to_raw_bson())
    }

    /// The token's value as it appeared on the wire.
    pub fn as_raw(&self) -> &RawBson {
        &self.0
    }
}

/// A [change event](https://www.mongodb.com/docs/manual/reference/change-events/) observed by a
/// change stream.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamEvent<T> {
    /// The token identifying this event's position in the stream.
    #[serde(rename = "_id")]
    pub id: ResumeToken,

    /// The kind of change.
    pub operation_type: OperationType,

    /// The time of the oplog entry for this change.
    pub cluster_time: Option<Timestamp>,

    /// The database and collection the change applied to.
    pub ns: Option<ChangeNamespace>,

    /// The new namespace of a renamed collection.
    pub to: Option<ChangeNamespace>,

    /// The `_id` and shard key of the changed document.
    pub document_key: Option<Document>,

    /// The fields an update changed or removed.
    pub update_description: Option<UpdateDescription>,

    /// The document after the change, when the stream was configured to report it.
    pub full_document: Option<T>,
}

/// Describes which fields have been updated or removed from a document.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateDescription {
    /// The changed fields and their new values.
    pub updated_fields: Document,

    /// The names of the removed fields.
    pub removed_fields: Vec<String>,
}

/// The kind of change an event describes.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
    DropDatabase,
    /// The stream can produce no further events.
    Invalidate,
    /// An event type this crate does not know about.
    #[serde(other)]
    Other,
}

/// The database and, for collection-level events, collection an event refers to.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[non_exhaustive]
pub struct ChangeNamespace {
    /// The database name.
    pub db: String,

    /// The collection name.
    pub coll: Option<String>,
}
