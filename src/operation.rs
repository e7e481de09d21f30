mod abort_transaction;
pub(crate) mod aggregate;
mod commit_transaction;
mod count;
mod count_documents;
mod distinct;
mod end_sessions;
mod find;
mod get_more;
mod kill_cursors;
mod run_command;


use std::{collections::VecDeque, fmt::Debug};

use serde::{Deserialize, Serialize};

use crate::{
    bson::{self, Document, RawBson, RawDocumentBuf},
    change_stream::event::ResumeToken,
    cmap::{Command, RawCommandResponse},
    error::{Error, Result},
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
    Namespace,
};

pub(crate) use abort_transaction::AbortTransaction;
pub(crate) use aggregate::{change_stream::ChangeStreamAggregate, Aggregate, AggregateTarget};
pub(crate) use commit_transaction::CommitTransaction;
pub(crate) use count::Count;
pub(crate) use count_documents::CountDocuments;
pub(crate) use distinct::Distinct;
pub(crate) use end_sessions::EndSessions;
pub(crate) use find::FindOne;
pub(crate) use get_more::{GetMore, GetMoreResult};
pub(crate) use kill_cursors::KillCursors;
pub(crate) use run_command::RunCommand;

pub(crate) const SERVER_4_0_0_WIRE_VERSION: i32 = 7;
pub(crate) const SERVER_4_4_0_WIRE_VERSION: i32 = 9;

/// One server command together with the logic to route it and decode its reply.
///
/// Every method is required here so that wrapping operations forward all of them; leaf
/// operations implement `OperationWithDefaults` instead.
pub(crate) trait Operation {
    /// What a successful reply decodes into.
    type O;

    /// Command name, used for logging and tracing.
    const NAME: &'static str;

    /// Produces the command body for the selected server. Any state needed to decode the reply
    /// may be kept on `self`.
    fn build(&mut self, description: &ServerDescription) -> Result<Command>;

    /// Decodes a validated reply.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &ServerDescription,
    ) -> Result<Self::O>;

    /// Gives the operation a chance to turn a failed round trip into a value.
    fn handle_error(&self, error: Error) -> Result<Self::O>;

    /// Server selection criteria requested by this operation, if any.
    fn selection_criteria(&self) -> Option<&SelectionCriteria>;

    /// Whether `readConcern` may be attached to the command.
    fn supports_read_concern(&self) -> bool;

    /// Whether `lsid` and friends may be attached to the command.
    fn supports_sessions(&self) -> bool;

    /// Whether the output of this operation holds a live server cursor, in which case an implicit
    /// session outlives the round trip.
    fn produces_cursor(&self) -> bool;

    fn name(&self) -> &str;
}

// Same surface as `Operation` with defaults filled in. Leaf operations implement this one.
pub(crate) trait OperationWithDefaults {
    /// What a successful reply decodes into.
    type O;

    /// Command name, used for logging and tracing.
    const NAME: &'static str;

    /// Produces the command body for the selected server. Any state needed to decode the reply
    /// may be kept on `self`.
    fn build(&mut self, description: &ServerDescription) -> Result<Command>;

    /// Decodes a validated reply.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &ServerDescription,
    ) -> Result<Self::O>;

    /// Gives the operation a chance to turn a failed round trip into a value.
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    /// Server selection criteria requested by this operation, if any.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// Whether `readConcern` may be attached to the command.
    fn supports_read_concern(&self) -> bool {
        false
    }

    /// Whether `lsid` and friends may be attached to the command.
    fn supports_sessions(&self) -> bool {
        true
    }

    /// Whether the output of this operation holds a live server cursor.
    fn produces_cursor(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

impl<T: OperationWithDefaults> Operation for T {
    type O = T::O;
    const NAME: &'static str = T::NAME;
    fn build(&mut self, description: &ServerDescription) -> Result<Command> {
        self.build(description)
    }
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &ServerDescription,
    ) -> Result<Self::O> {
        self.handle_response(response, description)
    }
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        self.handle_error(error)
    }
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria()
    }
    fn supports_read_concern(&self) -> bool {
        self.supports_read_concern()
    }
    fn supports_sessions(&self) -> bool {
        self.supports_sessions()
    }
    fn produces_cursor(&self) -> bool {
        self.produces_cursor()
    }
    fn name(&self) -> &str {
        self.name()
    }
}

/// Merges the serialized fields of `options` into `doc`. Options that do not serialize to a
/// document are reported as an internal error.
pub(crate) fn append_options<T: Serialize + Debug>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        let options_doc = bson::to_document(options)?;
        doc.extend(options_doc);
    }
    Ok(())
}

#[derive(Deserialize, Debug)]
pub(crate) struct EmptyBody {}

#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Namespace,

    pub(crate) first_batch: VecDeque<RawDocumentBuf>,

    pub(crate) post_batch_resume_token: Option<RawDocumentBuf>,
}

impl CursorInfo {
    pub(crate) fn post_batch_resume_token(&self) -> Option<ResumeToken> {
        self.post_batch_resume_token
            .clone()
            .map(|token| ResumeToken(RawBson::Document(token)))
    }
}

/// The first document of a cursor's first batch, if the batch is non-empty.
#[derive(Debug, Clone)]
pub(crate) struct SingleCursorResult<T>(Option<T>);

impl<'de, T> Deserialize<'de> for SingleCursorResult<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FullCursorBody<T> {
            cursor: InteriorBody<T>,
        }

        #[derive(Deserialize)]
        struct InteriorBody<T> {
            #[serde(rename = "firstBatch")]
            first_batch: Vec<T>,
        }

        let mut full_body = FullCursorBody::deserialize(deserializer)?;
        Ok(SingleCursorResult(full_body.cursor.first_batch.pop()))
    }
}
