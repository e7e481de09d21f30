use std::time::Duration;

use crate::{
    bson::doc,
    cmap::{Command, RawCommandResponse},
    error::Result,
    operation::OperationWithDefaults,
    sdam::ServerDescription,
    selection_criteria::{ReadPreference, SelectionCriteria},
};

pub(crate) struct CommitTransaction {
    max_commit_time: Option<Duration>,
    selection_criteria: SelectionCriteria,
}

impl CommitTransaction {
    pub(crate) fn new(max_commit_time: Option<Duration>) -> Self {
        Self {
            max_commit_time,
            selection_criteria: ReadPreference::Primary.into(),
        }
    }
}

impl OperationWithDefaults for CommitTransaction {
    type O = ();

    const NAME: &'static str = "commitTransaction";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
        };
        if let Some(max_commit_time) = self.max_commit_time {
            body.insert(
                "maxTimeMS",
                i64::try_from(max_commit_time.as_millis()).unwrap_or(i64::MAX),
            );
        }

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
