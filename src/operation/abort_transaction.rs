use crate::{
    bson::doc,
    cmap::{Command, RawCommandResponse},
    error::Result,
    operation::OperationWithDefaults,
    sdam::ServerDescription,
    selection_criteria::{ReadPreference, SelectionCriteria},
};

pub(crate) struct AbortTransaction {
    selection_criteria: SelectionCriteria,
}

impl AbortTransaction {
    pub(crate) fn new() -> Self {
        Self {
            selection_criteria: ReadPreference::Primary.into(),
        }
    }
}

impl OperationWithDefaults for AbortTransaction {
    type O = ();

    const NAME: &'static str = "abortTransaction";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: 1,
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
}
