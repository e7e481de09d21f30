use crate::{
    bson::doc,
    cmap::{Command, RawCommandResponse},
    error::Result,
    operation::OperationWithDefaults,
    sdam::{ServerAddress, ServerDescription},
    selection_criteria::SelectionCriteria,
    Namespace,
};

/// Releases a server cursor that will not be iterated any further.
#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_id: i64,
    selection_criteria: SelectionCriteria,
}

impl KillCursors {
    pub(crate) fn new(ns: Namespace, cursor_id: i64, address: ServerAddress) -> Self {
        Self {
            ns,
            cursor_id,
            selection_criteria: SelectionCriteria::from_address(address),
        }
    }
}

impl OperationWithDefaults for KillCursors {
    type O = ();

    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": [self.cursor_id],
        };

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        _response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}
