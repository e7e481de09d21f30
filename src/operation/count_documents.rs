use serde::Deserialize;

use super::{OperationWithDefaults, SingleCursorResult};
use crate::{
    bson::{doc, Document},
    cmap::{Command, RawCommandResponse},
    error::{Error, Result},
    operation::aggregate::Aggregate,
    options::{AggregateOptions, CountOptions},
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
    serde_util,
    Namespace,
};

pub(crate) struct CountDocuments {
    aggregate: Aggregate,
}

impl CountDocuments {
    pub(crate) fn new(
        namespace: Namespace,
        filter: Document,
        options: Option<CountOptions>,
    ) -> Result<Self> {
        let mut pipeline = vec![doc! {
            "$match": filter,
        }];

        if let Some(skip) = options.as_ref().and_then(|opts| opts.skip) {
            let s = i64::try_from(skip).map_err(|_| {
                Error::invalid_argument(format!("skip exceeds range of i64: {}", skip))
            })?;
            pipeline.push(doc! {
                "$skip": s
            });
        }

        if let Some(limit) = options.as_ref().and_then(|opts| opts.limit) {
            let l = i64::try_from(limit).map_err(|_| {
                Error::invalid_argument(format!("limit exceeds range of i64: {}", limit))
            })?;
            pipeline.push(doc! {
                "$limit": l
            });
        }

        pipeline.push(doc! {
            "$group": {
                "_id": 1,
                "n": { "$sum": 1 },
            }
        });

        let aggregate_options = options.map(|opts| {
            AggregateOptions::builder()
                .hint(opts.hint)
                .max_time(opts.max_time)
                .collation(opts.collation)
                .selection_criteria(opts.selection_criteria)
                .comment(opts.comment)
                .build()
        });

        Ok(Self {
            aggregate: Aggregate::new(namespace, pipeline, aggregate_options),
        })
    }
}

impl OperationWithDefaults for CountDocuments {
    type O = u64;

    const NAME: &'static str = Aggregate::NAME;

    fn build(&mut self, description: &ServerDescription) -> Result<Command> {
        self.aggregate.build(description)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &ServerDescription,
    ) -> Result<Self::O> {
        let response: SingleCursorResult<Body> = response.body()?;
        Ok(response.0.map(|r| r.n).unwrap_or(0))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.aggregate.selection_criteria()
    }

    fn supports_read_concern(&self) -> bool {
        self.aggregate.supports_read_concern()
    }
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(deserialize_with = "serde_util::deserialize_u64_from_bson_number")]
    n: u64,
}
