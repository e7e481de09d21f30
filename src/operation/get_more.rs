#[cfg(test)]
mod test;

use std::{collections::VecDeque, time::Duration};

use serde::Deserialize;

use crate::{
    bson::{doc, Bson, RawBson, RawDocumentBuf},
    change_stream::event::ResumeToken,
    cmap::{Command, RawCommandResponse},
    cursor::CursorInformation,
    error::{Error, Result},
    operation::OperationWithDefaults,
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
    Namespace,
};

#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    selection_criteria: SelectionCriteria,
    batch_size: Option<u32>,
    max_time: Option<Duration>,
    comment: Option<Bson>,
}

impl GetMore {
    pub(crate) fn new(info: &CursorInformation) -> Self {
        Self {
            ns: info.ns.clone(),
            cursor_id: info.id,
            selection_criteria: SelectionCriteria::from_address(info.address.clone()),
            batch_size: info.batch_size,
            max_time: info.max_time,
            comment: info.comment.clone(),
        }
    }
}

impl OperationWithDefaults for GetMore {
    type O = GetMoreResult;

    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if let Some(batch_size) = self.batch_size {
            let batch_size = i32::try_from(batch_size).map_err(|_| {
                Error::invalid_argument("The batch size must fit into a signed 32-bit integer")
            })?;
            if batch_size != 0 {
                body.insert("batchSize", batch_size);
            }
        }

        if let Some(ref max_time) = self.max_time {
            body.insert(
                "maxTimeMS",
                i32::try_from(max_time.as_millis()).unwrap_or(i32::MAX),
            );
        }

        if let Some(ref comment) = self.comment {
            body.insert("comment", comment.clone());
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        let response: GetMoreResponseBody = response.body()?;

        Ok(GetMoreResult {
            batch: response.cursor.next_batch,
            exhausted: response.cursor.id == 0,
            post_batch_resume_token: response
                .cursor
                .post_batch_resume_token
                .map(|token| ResumeToken(RawBson::Document(token))),
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}

/// One batch returned by a `getMore`.
#[derive(Debug)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<RawDocumentBuf>,
    pub(crate) exhausted: bool,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetMoreResponseBody {
    cursor: NextBatchBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextBatchBody {
    id: i64,
    next_batch: VecDeque<RawDocumentBuf>,
    post_batch_resume_token: Option<RawDocumentBuf>,
}
