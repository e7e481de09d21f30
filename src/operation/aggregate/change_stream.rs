use crate::{
    bson::{doc, Document},
    change_stream::{event::ResumeToken, ChangeStreamData, WatchArgs},
    cmap::{Command, RawCommandResponse},
    cursor::CursorSpecification,
    error::{Error, Result},
    operation::{append_options, Operation, SERVER_4_0_0_WIRE_VERSION},
    options::ChangeStreamOptions,
    sdam::ServerDescription,
    selection_criteria::SelectionCriteria,
};

use super::Aggregate;

/// The aggregate that opens, or re-opens, a change stream.
pub(crate) struct ChangeStreamAggregate {
    inner: Aggregate,
    options: ChangeStreamOptions,
}

impl ChangeStreamAggregate {
    pub(crate) fn new(args: &WatchArgs, resume_data: Option<&ChangeStreamData>) -> Result<Self> {
        let mut options = args.options.clone().unwrap_or_default();
        if let Some(data) = resume_data {
            data.apply_resume_point(&mut options);
        }

        let mut stage = Document::new();
        if args.all_changes_for_cluster {
            stage.insert("allChangesForCluster", true);
        }
        append_options(&mut stage, Some(&options))?;

        let mut agg_pipeline = vec![doc! { "$changeStream": stage }];
        agg_pipeline.extend(args.pipeline.iter().cloned());
        Ok(Self {
            inner: Aggregate::new(
                args.target.clone(),
                agg_pipeline,
                Some(options.aggregate_options()),
            ),
            options,
        })
    }

    fn has_start_point(&self) -> bool {
        self.options.start_at_operation_time.is_some()
            || self.options.resume_after.is_some()
            || self.options.start_after.is_some()
    }
}

impl Operation for ChangeStreamAggregate {
    type O = (CursorSpecification, ChangeStreamData);

    const NAME: &'static str = Aggregate::NAME;

    fn build(&mut self, description: &ServerDescription) -> Result<Command> {
        self.inner.build(description)
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &ServerDescription,
    ) -> Result<Self::O> {
        let op_time = response.operation_time();
        let spec = self.inner.handle_response(response, description)?;

        let mut data = ChangeStreamData {
            resume_token: initial_resume_token(&self.options, &spec),
            ..Default::default()
        };
        if !self.has_start_point()
            && description
                .max_wire_version
                .map_or(false, |v| v >= SERVER_4_0_0_WIRE_VERSION)
            && spec.initial_buffer.is_empty()
            && spec.post_batch_resume_token.is_none()
        {
            data.initial_operation_time = op_time;
        }

        Ok((spec, data))
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.selection_criteria()
    }

    fn supports_read_concern(&self) -> bool {
        self.inner.supports_read_concern()
    }

    fn supports_sessions(&self) -> bool {
        self.inner.supports_sessions()
    }

    fn produces_cursor(&self) -> bool {
        self.inner.produces_cursor()
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

/// The token a stream starts from before any document has been returned.
fn initial_resume_token(
    options: &ChangeStreamOptions,
    spec: &CursorSpecification,
) -> Option<ResumeToken> {
    match spec.post_batch_resume_token {
        Some(ref token) if spec.initial_buffer.is_empty() => Some(token.clone()),
        _ => options
            .start_after
            .as_ref()
            .or(options.resume_after.as_ref())
            .cloned(),
    }
}
