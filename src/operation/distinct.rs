use serde::Deserialize;

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, RawCommandResponse},
    coll::{options::DistinctOptions, Namespace},
    error::Result,
    operation::{append_options, OperationWithDefaults},
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
};

pub(crate) struct Distinct {
    ns: Namespace,
    field_name: String,
    query: Document,
    options: Option<DistinctOptions>,
}

impl Distinct {
    pub(crate) fn new(
        ns: Namespace,
        field_name: String,
        query: Document,
        options: Option<DistinctOptions>,
    ) -> Self {
        Distinct {
            ns,
            field_name,
            query,
            options,
        }
    }
}

impl OperationWithDefaults for Distinct {
    type O = Vec<Bson>;

    const NAME: &'static str = "distinct";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let mut body: Document = doc! {
            Self::NAME: self.ns.coll.clone(),
            "key": self.field_name.clone(),
        };

        if !self.query.is_empty() {
            body.insert("query", self.query.clone());
        }

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        let response: Response = response.body()?;
        Ok(response.values)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        if let Some(ref options) = self.options {
            return options.selection_criteria.as_ref();
        }
        None
    }

    fn supports_read_concern(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    values: Vec<Bson>,
}
