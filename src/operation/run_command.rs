
use crate::{
    bson::Document,
    bson_util,
    cmap::{Command, RawCommandResponse},
    error::{Error, Result},
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
};

use super::OperationWithDefaults;

/// Commands that are rejected by the server when sent with an `lsid`.
const SESSIONS_UNSUPPORTED_COMMANDS: &[&str] = &["killcursors", "parallelcollectionscan"];

#[derive(Debug, Clone)]
pub(crate) struct RunCommand {
    db: String,
    command: Document,
    selection_criteria: Option<SelectionCriteria>,
}

impl RunCommand {
    pub(crate) fn new(
        db: String,
        command: Document,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::invalid_argument(
                "an empty document cannot be passed to a run_command operation",
            ));
        }
        Ok(Self {
            db,
            command,
            selection_criteria,
        })
    }

    fn command_name(&self) -> Option<&str> {
        bson_util::first_key(&self.command)
    }
}

impl OperationWithDefaults for RunCommand {
    type O = Document;

    // Since we can't actually specify a string statically here, we just put a descriptive string
    // that should fail loudly if accidentally passed to the server.
    const NAME: &'static str = "$genericRunCommand";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let command_name = self.command_name().ok_or_else(|| {
            Error::invalid_argument("an empty document cannot be passed to a run_command operation")
        })?;

        Ok(Command::new(
            command_name.to_string(),
            self.db.clone(),
            self.command.clone(),
        ))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        Ok(Document::try_from(response.raw_body())?)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn supports_sessions(&self) -> bool {
        self.command_name()
            .map(|command_name| {
                !SESSIONS_UNSUPPORTED_COMMANDS.contains(&command_name.to_lowercase().as_str())
            })
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        self.command_name().unwrap_or(Self::NAME)
    }
}
