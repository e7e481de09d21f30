#[cfg(test)]
mod test;

use crate::{
    bson::{doc, Document, RawDocumentBuf},
    cmap::{Command, RawCommandResponse},
    error::Result,
    operation::{append_options, CursorBody, OperationWithDefaults},
    options::FindOneOptions,
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
    Namespace,
};

/// A `find` limited to a single document in a single batch, so no server cursor outlives the
/// round trip.
#[derive(Debug)]
pub(crate) struct FindOne {
    ns: Namespace,
    filter: Document,
    options: Option<Box<FindOneOptions>>,
}

impl FindOne {
    pub(crate) fn new(ns: Namespace, filter: Document, options: Option<FindOneOptions>) -> Self {
        Self {
            ns,
            filter,
            options: options.map(Box::new),
        }
    }
}

impl OperationWithDefaults for FindOne {
    type O = Option<RawDocumentBuf>;
    const NAME: &'static str = "find";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        append_options(&mut body, self.options.as_ref())?;

        body.insert("limit", 1_i64);
        body.insert("singleBatch", true);

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        let mut response: CursorBody = response.body()?;
        Ok(response.cursor.first_batch.pop_front())
    }

    fn supports_read_concern(&self) -> bool {
        true
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options
            .as_ref()
            .and_then(|opts| opts.selection_criteria.as_ref())
    }
}
