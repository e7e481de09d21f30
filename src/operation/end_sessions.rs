use crate::{
    bson::{doc, Document},
    bson_util,
    cmap::{Command, RawCommandResponse},
    error::Result,
    operation::OperationWithDefaults,
    sdam::ServerDescription,
    selection_criteria::{ReadPreference, SelectionCriteria},
};

/// Tells the server to discard the given logical sessions.
#[derive(Debug)]
pub(crate) struct EndSessions {
    session_ids: Vec<Document>,
    selection_criteria: SelectionCriteria,
}

impl EndSessions {
    pub(crate) fn new(session_ids: Vec<Document>) -> Self {
        Self {
            session_ids,
            selection_criteria: ReadPreference::PrimaryPreferred { options: None }.into(),
        }
    }
}

impl OperationWithDefaults for EndSessions {
    type O = ();

    const NAME: &'static str = "endSessions";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: bson_util::to_bson_array(&self.session_ids),
        };

        Ok(Command::new(Self::NAME, "admin", body))
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

    fn supports_sessions(&self) -> bool {
        false
    }
}
