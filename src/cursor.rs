#[cfg(test)]
mod test;

use std::{collections::VecDeque, marker::PhantomData, time::Duration};

use futures_core::Stream;
use serde::de::DeserializeOwned;

use crate::{
    bson::{Bson, RawDocument, RawDocumentBuf},
    bundle::SessionRef,
    change_stream::event::ResumeToken,
    client::session::ClientSession,
    error::{Error, Result},
    operation::{self, GetMore, KillCursors},
    sdam::ServerAddress,
    Client,
    Namespace,
};

/// A `Cursor` streams the result of a query. When a query is made, a `Cursor` is returned with
/// the first batch of results from the server; the documents are returned as the `Cursor` is
/// advanced. When the batch is exhausted and the server has more results, the `Cursor` fetches
/// the next batch with a `getMore`, and so forth until the results are exhausted.
///
/// The batch size of the `Cursor` can be configured using the options to the method that
/// returns it, for example [`AggregateOptions::batch_size`](crate::options::AggregateOptions).
///
/// ```rust,ignore
/// let mut cursor = coll.aggregate(pipeline, AggregateBundle::new()).await?;
/// while cursor.advance().await? {
///     println!("{:?}", cursor.deserialize_current()?);
/// }
/// ```
///
/// A `Cursor` that is dropped before it is exhausted kills its server-side cursor in the
/// background, provided it is dropped inside a tokio runtime.
pub struct Cursor<T> {
    inner: CursorInner,
    _phantom: PhantomData<fn() -> T>,
}

/// The session a cursor must send its getMores and killCursors in.
#[derive(Debug)]
pub(crate) enum CursorSession {
    /// A session created by the dispatch layer that the cursor now owns.
    Implicit(ClientSession),
    /// A session supplied by the caller.
    Explicit(SessionRef),
}

struct CursorInner {
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<RawDocumentBuf>,
    current: Option<RawDocumentBuf>,
    exhausted: bool,
    post_batch_resume_token: Option<ResumeToken>,
    session: Option<CursorSession>,
    get_more_pending: bool,
}

impl<T> Cursor<T> {
    pub(crate) fn new(
        client: Client,
        spec: CursorSpecification,
        session: Option<CursorSession>,
    ) -> Self {
        let mut inner = CursorInner {
            client,
            exhausted: spec.info.id == 0,
            info: spec.info,
            buffer: spec.initial_buffer,
            current: None,
            post_batch_resume_token: spec.post_batch_resume_token,
            session,
            get_more_pending: false,
        };
        if inner.exhausted {
            inner.release_implicit_session();
        }
        Self {
            inner,
            _phantom: PhantomData,
        }
    }

    /// Move the cursor forward, fetching batches from the server until a document is available
    /// or the cursor is exhausted. Returns whether a document is available.
    pub async fn advance(&mut self) -> Result<bool> {
        loop {
            if self.inner.try_advance().await? {
                return Ok(true);
            }
            if self.inner.exhausted {
                return Ok(false);
            }
        }
    }

    /// Move the cursor forward, issuing at most one `getMore`. Returns `false` if the server
    /// returned an empty batch or the cursor is exhausted.
    pub async fn try_advance(&mut self) -> Result<bool> {
        self.inner.try_advance().await
    }

    /// The document the cursor is positioned on, if any.
    pub fn current(&self) -> Option<&RawDocument> {
        self.inner.current.as_deref()
    }

    /// Whether the server-side cursor has been exhausted or killed. Documents may still be
    /// buffered locally.
    pub fn is_exhausted(&self) -> bool {
        self.inner.exhausted
    }

    /// The id of the server-side cursor. Zero once the server has exhausted it.
    pub fn id(&self) -> i64 {
        self.inner.info.id
    }

    /// The address of the server the cursor lives on.
    pub fn address(&self) -> &ServerAddress {
        &self.inner.info.address
    }

    /// Kills the server-side cursor if it is still alive and ends an implicit session owned by
    /// the cursor.
    pub async fn close(mut self) -> Result<()> {
        self.inner.close().await
    }

    /// Returns a cursor that deserializes documents into `D` instead.
    pub fn with_type<D>(self) -> Cursor<D> {
        Cursor {
            inner: self.inner,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&ResumeToken> {
        self.inner.post_batch_resume_token.as_ref()
    }

    /// Whether no documents remain in the current batch.
    pub(crate) fn is_batch_empty(&self) -> bool {
        self.inner.buffer.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> Option<&CursorSession> {
        self.inner.session.as_ref()
    }
}

impl<T> Cursor<T>
where
    T: DeserializeOwned,
{
    /// Deserializes the document the cursor is positioned on.
    pub fn deserialize_current(&self) -> Result<T> {
        match self.inner.current {
            Some(ref current) => Ok(crate::bson::from_slice(current.as_bytes())?),
            None => Err(Error::invalid_argument(
                "the cursor is not positioned on a document; call advance first",
            )),
        }
    }

    /// Converts the cursor into a [`Stream`] of deserialized documents.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures_util::stream::try_unfold(self, |mut cursor| async move {
            if cursor.advance().await? {
                let document = cursor.deserialize_current()?;
                Ok(Some((document, cursor)))
            } else {
                Ok(None)
            }
        })
    }
}

impl CursorInner {
    async fn try_advance(&mut self) -> Result<bool> {
        if let Some(document) = self.buffer.pop_front() {
            self.current = Some(document);
            return Ok(true);
        }
        self.current = None;
        if self.exhausted {
            return Ok(false);
        }

        self.get_more().await?;
        self.current = self.buffer.pop_front();
        Ok(self.current.is_some())
    }

    async fn get_more(&mut self) -> Result<()> {
        // The flag outlives a getMore future dropped before its reply arrived.
        if self.get_more_pending {
            return Err(Error::interrupted_get_more());
        }
        self.get_more_pending = true;
        let result = self
            .client
            .execute_in_cursor_session(GetMore::new(&self.info), self.session.as_mut())
            .await;
        self.get_more_pending = false;

        match result {
            Ok(batch) => {
                self.buffer = batch.batch;
                self.post_batch_resume_token = batch.post_batch_resume_token;
                if batch.exhausted {
                    self.mark_exhausted();
                }
                Ok(())
            }
            Err(error) => {
                self.mark_exhausted();
                Err(error)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        let kill_cursors = KillCursors::new(
            self.info.ns.clone(),
            self.info.id,
            self.info.address.clone(),
        );
        let result = self
            .client
            .execute_in_cursor_session(kill_cursors, self.session.as_mut())
            .await;
        self.mark_exhausted();
        result
    }

    fn mark_exhausted(&mut self) {
        self.exhausted = true;
        self.release_implicit_session();
    }

    fn release_implicit_session(&mut self) {
        if let Some(CursorSession::Implicit(mut session)) = self.session.take() {
            session.end_session();
        }
    }
}

impl Drop for CursorInner {
    fn drop(&mut self) {
        if self.exhausted {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.release_implicit_session();
            return;
        };

        let client = self.client.clone();
        let kill_cursors = KillCursors::new(
            self.info.ns.clone(),
            self.info.id,
            self.info.address.clone(),
        );
        let mut session = self.session.take();
        handle.spawn(async move {
            if let Err(error) = client
                .execute_in_cursor_session(kill_cursors, session.as_mut())
                .await
            {
                tracing::debug!(error = %error, "failed to kill a dropped cursor");
            }
        });
    }
}

/// Specification used to create a new cursor.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<RawDocumentBuf>,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
}

impl CursorSpecification {
    pub(crate) fn new(
        info: operation::CursorInfo,
        address: ServerAddress,
        batch_size: impl Into<Option<u32>>,
        max_time: impl Into<Option<Duration>>,
        comment: impl Into<Option<Bson>>,
    ) -> Self {
        Self {
            post_batch_resume_token: info.post_batch_resume_token(),
            info: CursorInformation {
                ns: info.ns,
                id: info.id,
                address,
                batch_size: batch_size.into(),
                max_time: max_time.into(),
                comment: comment.into(),
            },
            initial_buffer: info.first_batch,
        }
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }
}

/// Static information about a cursor.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) address: ServerAddress,
    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) max_time: Option<Duration>,
    pub(crate) comment: Option<Bson>,
}
