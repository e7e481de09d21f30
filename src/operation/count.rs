
use serde::Deserialize;

use crate::{
    bson::doc,
    cmap::{Command, RawCommandResponse},
    coll::{options::EstimatedDocumentCountOptions, Namespace},
    error::{Error, Result},
    operation::{append_options, OperationWithDefaults},
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
    serde_util,
};

pub(crate) struct Count {
    ns: Namespace,
    options: Option<EstimatedDocumentCountOptions>,
}

impl Count {
    pub(crate) fn new(ns: Namespace, options: Option<EstimatedDocumentCountOptions>) -> Self {
        Count { ns, options }
    }
}

impl OperationWithDefaults for Count {
    type O = u64;

    const NAME: &'static str = "count";

    fn build(&mut self, _description: &ServerDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        let response_body: ResponseBody = response.body()?;
        Ok(response_body.n)
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        if error.is_ns_not_found() {
            Ok(0)
        } else {
            Err(error)
        }
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
pub(crate) struct ResponseBody {
    #[serde(deserialize_with = "serde_util::deserialize_u64_from_bson_number")]
    n: u64,
}
