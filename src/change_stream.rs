//! Contains the functionality for change streams.
pub mod event;
pub mod options;

use std::marker::PhantomData;

use futures_core::Stream;
use serde::de::DeserializeOwned;

use crate::{
    bson::{Document, RawDocumentBuf, Timestamp},
    bundle::SessionRef,
    change_stream::{event::ResumeToken, options::ChangeStreamOptions},
    cursor::{Cursor, CursorSession},
    error::{Error, ErrorKind, Result},
    operation::{AggregateTarget, ChangeStreamAggregate},
    trace::change_stream as trace,
    Client,
};

/// A `ChangeStream` streams the ongoing changes of its associated collection, database or
/// deployment. `ChangeStream` instances are created with the `watch` method of the relevant
/// target.
///
/// `ChangeStream`s are "resumable": when advancing fails with a
/// ["resumable"](https://github.com/mongodb/specifications/blob/master/source/change-streams/change-streams.md#resumable-error)
/// error, such as a transient network failure or a server-side cursor that was killed, the
/// stream re-opens its cursor once from the last token it observed and carries on. A second
/// failure in a row is reported to the caller and fails the stream. A stream can also be
/// resumed manually by passing a [`ResumeToken`] retrieved from a past event as the
/// [`resume_after`](ChangeStreamOptions::resume_after) or
/// [`start_after`](ChangeStreamOptions::start_after) option of a new stream.
///
/// ```rust,ignore
/// let mut stream = coll.watch(Vec::new(), ChangeStreamBundle::new()).await?;
/// while stream.advance().await? {
///     println!("{:?}", stream.decode()?);
/// }
/// ```
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams) for more
/// details.
pub struct ChangeStream<T> {
    client: Client,
    cursor: Option<Cursor<RawDocumentBuf>>,
    args: WatchArgs,
    data: ChangeStreamData,
    session: Option<SessionRef>,
    state: ChangeStreamState,
    current: Option<RawDocumentBuf>,
    last_error: Option<Error>,
    _phantom: PhantomData<fn() -> T>,
}

/// The lifecycle of a [`ChangeStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChangeStreamState {
    /// The stream has a live cursor.
    Open,

    /// The stream is re-opening its cursor after a resumable error.
    Resuming,

    /// The stream was closed by the caller or exhausted by the server.
    Closed,

    /// The stream hit an error it cannot recover from.
    Failed,
}

/// Arguments passed to a `watch` method, captured to allow resume.
#[derive(Debug, Clone)]
pub(crate) struct WatchArgs {
    /// The pipeline of stages to append to an initial `$changeStream` stage.
    pub(crate) pipeline: Vec<Document>,

    /// The original target of the change stream.
    pub(crate) target: AggregateTarget,

    /// The options provided to the initial `$changeStream` stage.
    pub(crate) options: Option<ChangeStreamOptions>,

    /// Whether the stream observes every change in the cluster.
    pub(crate) all_changes_for_cluster: bool,
}

/// Dynamic change stream data needed for resume.
#[derive(Debug, Default, Clone)]
pub(crate) struct ChangeStreamData {
    /// The `operationTime` returned by the initial `aggregate` command.
    pub(crate) initial_operation_time: Option<Timestamp>,

    /// The cached resume token.
    pub(crate) resume_token: Option<ResumeToken>,

    /// Whether the stream has returned a document to the caller.
    pub(crate) document_returned: bool,
}

impl ChangeStreamData {
    /// Writes the point a resumed stream should start from into `options`.
    pub(crate) fn apply_resume_point(&self, options: &mut ChangeStreamOptions) {
        if let Some(ref token) = self.resume_token {
            if options.start_after.is_some() && !self.document_returned {
                options.start_after = Some(token.clone());
                options.resume_after = None;
            } else {
                options.resume_after = Some(token.clone());
                options.start_after = None;
            }
            options.start_at_operation_time = None;
        } else if options.start_at_operation_time.is_none() {
            options.start_at_operation_time = self.initial_operation_time;
        }
    }
}

impl<T> ChangeStream<T> {
    pub(crate) fn new(
        client: Client,
        cursor: Cursor<RawDocumentBuf>,
        args: WatchArgs,
        data: ChangeStreamData,
        session: Option<SessionRef>,
    ) -> Self {
        Self {
            client,
            cursor: Some(cursor),
            args,
            data,
            session,
            state: ChangeStreamState::Open,
            current: None,
            last_error: None,
            _phantom: PhantomData,
        }
    }

    /// Waits for the next change, fetching batches from the server until one arrives, the
    /// stream is closed, or an error occurs. Each `getMore` waits on the server for at most the
    /// stream's max await time. Returns whether a change is available to
    /// [`decode`](ChangeStream::decode).
    pub async fn advance(&mut self) -> Result<bool> {
        loop {
            if self.advance_once().await? {
                return Ok(true);
            }
            if !self.is_alive() {
                return Ok(false);
            }
        }
    }

    /// The cached resume token that can be used to resume after the most recently returned
    /// change.
    ///
    /// See the documentation
    /// [here](https://www.mongodb.com/docs/manual/changeStreams/#change-stream-resume-token) for
    /// more information on change stream resume tokens.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.data.resume_token.clone()
    }

    /// The state the stream is in.
    pub fn state(&self) -> ChangeStreamState {
        self.state
    }

    /// Returns whether the change stream will continue to receive events.
    pub fn is_alive(&self) -> bool {
        matches!(
            self.state,
            ChangeStreamState::Open | ChangeStreamState::Resuming
        )
    }

    /// The last error the stream reported to the caller.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// The raw change document the stream is positioned on.
    pub fn current(&self) -> Option<&crate::bson::RawDocument> {
        self.current.as_deref()
    }

    /// Closes the stream, killing its server-side cursor.
    pub async fn close(&mut self) -> Result<()> {
        self.state = ChangeStreamState::Closed;
        self.current = None;
        match self.cursor.take() {
            Some(cursor) => cursor.close().await,
            None => Ok(()),
        }
    }

    /// Returns a stream that decodes changes into `D` instead.
    pub fn with_type<D: DeserializeOwned>(self) -> ChangeStream<D> {
        ChangeStream {
            client: self.client,
            cursor: self.cursor,
            args: self.args,
            data: self.data,
            session: self.session,
            state: self.state,
            current: self.current,
            last_error: self.last_error,
            _phantom: PhantomData,
        }
    }

    /// Moves to the next change, issuing at most one `getMore` and resuming at most once.
    async fn advance_once(&mut self) -> Result<bool> {
        self.current = None;
        match self.state {
            ChangeStreamState::Closed => return Ok(false),
            ChangeStreamState::Failed => {
                return match self.last_error {
                    Some(ref error) => Err(error.clone()),
                    None => Ok(false),
                }
            }
            // A previous advance was cancelled mid-resume.
            ChangeStreamState::Resuming => {
                if let Err(error) = self.resume().await {
                    return Err(self.fail(error));
                }
            }
            ChangeStreamState::Open => {}
        }

        let advanced = match self.try_advance_cursor().await {
            Ok(advanced) => advanced,
            Err(error) if error.is_resumable() => {
                let target = self.args.target.to_string();
                trace::emit_resume_attempt(&target, &error, self.data.resume_token.is_some());
                if let Err(error) = self.resume().await {
                    return Err(self.fail(error));
                }
                trace::emit_resumed(&target);
                match self.try_advance_cursor().await {
                    Ok(advanced) => advanced,
                    Err(error) => return Err(self.fail(error)),
                }
            }
            Err(error) => return Err(self.fail(error)),
        };

        self.observe(advanced)
    }

    async fn try_advance_cursor(&mut self) -> Result<bool> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.try_advance().await,
            None => Ok(false),
        }
    }

    /// Updates the cached token after the cursor moved.
    fn observe(&mut self, advanced: bool) -> Result<bool> {
        let Some(ref cursor) = self.cursor else {
            return Ok(false);
        };

        if !advanced {
            if let Some(token) = cursor.post_batch_resume_token() {
                self.data.resume_token = Some(token.clone());
            }
            if cursor.is_exhausted() {
                self.state = ChangeStreamState::Closed;
                self.cursor = None;
            }
            return Ok(false);
        }

        let Some(current) = cursor.current() else {
            return Ok(false);
        };
        let token = match current.get("_id") {
            Ok(Some(id)) => match cursor.post_batch_resume_token() {
                Some(post_batch_token) if cursor.is_batch_empty() => Some(post_batch_token.clone()),
                _ => Some(ResumeToken::from_raw(id)),
            },
            _ => None,
        };
        let current = current.to_owned();

        let Some(token) = token else {
            return Err(self.fail(ErrorKind::MissingResumeToken.into()));
        };
        self.current = Some(current);
        self.data.resume_token = Some(token);
        self.data.document_returned = true;
        Ok(true)
    }

    /// Re-opens the server-side cursor from the cached resume point.
    async fn resume(&mut self) -> Result<()> {
        self.state = ChangeStreamState::Resuming;
        self.cursor = None;

        let op = ChangeStreamAggregate::new(&self.args, Some(&self.data))?;
        let ((spec, data), session) = self
            .client
            .execute_with_cursor_session(op, self.session.clone().map(CursorSession::Explicit))
            .await?;

        self.data = ChangeStreamData {
            initial_operation_time: self.data.initial_operation_time.or(data.initial_operation_time),
            resume_token: data.resume_token.or_else(|| self.data.resume_token.take()),
            document_returned: self.data.document_returned,
        };
        self.cursor = Some(Cursor::new(self.client.clone(), spec, session));
        self.state = ChangeStreamState::Open;
        Ok(())
    }

    /// Moves the stream to `Failed`, recording `error` as the reason.
    fn fail(&mut self, error: Error) -> Error {
        trace::emit_failed(&self.args.target.to_string(), &error);
        self.state = ChangeStreamState::Failed;
        self.cursor = None;
        self.current = None;
        self.last_error = Some(error.clone());
        error
    }
}

impl<T> ChangeStream<T>
where
    T: DeserializeOwned,
{
    /// Deserializes the change the stream is positioned on.
    pub fn decode(&self) -> Result<T> {
        match self.current {
            Some(ref current) => Ok(crate::bson::from_slice(current.as_bytes())?),
            None => Err(Error::invalid_argument(
                "the change stream is not positioned on a change; call advance first",
            )),
        }
    }

    /// Returns the next change if one is available after at most one round trip to the server.
    /// `Ok(None)` means the server has no new changes yet.
    pub async fn next_if_any(&mut self) -> Result<Option<T>> {
        if self.advance_once().await? {
            self.decode().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Converts the change stream into a [`Stream`] of decoded changes. The stream ends when
    /// the change stream is closed by the server, and after yielding an error the change
    /// stream cannot recover from.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures_util::stream::try_unfold(self, |mut stream| async move {
            if stream.advance().await? {
                let change = stream.decode()?;
                Ok(Some((change, stream)))
            } else {
                Ok(None)
            }
        })
    }
}
