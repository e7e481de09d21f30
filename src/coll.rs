pub mod options;

use std::{fmt, str::FromStr, sync::Arc};

use serde::{de::DeserializeOwned, de::Error as DeError, Deserialize, Deserializer, Serialize};

use self::options::*;
use crate::{
    bson::{Bson, Document},
    change_stream::{
        event::ChangeStreamEvent,
        options::ChangeStreamBundle,
        ChangeStream,
        WatchArgs,
    },
    error::{Error, Result},
    operation::{Aggregate, Count, CountDocuments, Distinct, FindOne},
    selection_criteria::SelectionCriteria,
    Client,
    Cursor,
    Database,
};

/// `Collection` is the client-side abstraction of a MongoDB Collection. It can be used to
/// dispatch collection-level read operations. A `Collection` can be obtained through a
/// [`Database`] by calling either [`Database::collection`] or
/// [`Database::collection_with_options`].
///
/// A [`Collection`] can be parameterized with any type that implements the `Deserialize` trait
/// from the [`serde`](https://serde.rs/) crate. The methods that return documents (e.g.
/// [`Collection::find_one`]) return instances of the generic parameter.
///
/// `Collection` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html) internally,
/// so it can safely be shared across threads or async tasks.
///
/// # Example
/// ```rust,ignore
/// use serde::Deserialize;
///
/// /// Define a type that models our data.
/// #[derive(Clone, Debug, Deserialize)]
/// struct Item {
///     id: u32,
/// }
///
/// // Parameterize our collection with the model.
/// let coll = client.database("items").collection::<Item>("in_stock");
///
/// for i in 0..5 {
///     let coll_ref = coll.clone();
///
///     // Spawn several tasks that operate on the same collection concurrently.
///     tokio::task::spawn(async move {
///         let count = coll_ref.count_documents(doc! { "id": i }, CountBundle::new()).await;
///     });
/// }
/// ```
#[derive(Debug)]
pub struct Collection<T>
where
    T: Send + Sync,
{
    inner: Arc<CollectionInner>,
    _phantom: std::marker::PhantomData<fn() -> T>,
}

// Because derive is too conservative, derive only implements Clone if T is Clone.
// Collection<T> does not actually store any value of type T (so T does not need to be clone).
impl<T> Clone for Collection<T>
where
    T: Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _phantom: Default::default(),
        }
    }
}

#[derive(Debug)]
struct CollectionInner {
    client: Client,
    db: Database,
    name: String,
    selection_criteria: Option<SelectionCriteria>,
}

impl<T> Collection<T>
where
    T: Send + Sync,
{
    pub(crate) fn new(db: Database, name: &str, options: Option<CollectionOptions>) -> Self {
        let options = options.unwrap_or_default();
        let selection_criteria = options
            .selection_criteria
            .or_else(|| db.selection_criteria().cloned());

        Self {
            inner: Arc::new(CollectionInner {
                client: db.client().clone(),
                db,
                name: name.to_string(),
                selection_criteria,
            }),
            _phantom: Default::default(),
        }
    }

    /// Gets a clone of the `Collection` with a different type `U`.
    pub fn clone_with_type<U: Send + Sync>(&self) -> Collection<U> {
        Collection {
            inner: self.inner.clone(),
            _phantom: Default::default(),
        }
    }

    /// Get the `Client` that this collection descended from.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Gets the name of the `Collection`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the namespace of the `Collection`.
    ///
    /// The namespace of a MongoDB collection is the concatenation of the name of the database
    /// containing it, the '.' character, and the name of the collection itself. For example, if a
    /// collection named "bar" is created in a database named "foo", the namespace of the collection
    /// is "foo.bar".
    pub fn namespace(&self) -> Namespace {
        Namespace {
            db: self.inner.db.name().into(),
            coll: self.name().into(),
        }
    }

    /// Gets the selection criteria of the `Collection`.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.selection_criteria.as_ref()
    }

    fn default_selection_criteria(&self, criteria: &mut Option<SelectionCriteria>) {
        if criteria.is_none() {
            *criteria = self.selection_criteria().cloned();
        }
    }

    /// Counts the documents in the collection matching `filter` with an aggregation. An empty
    /// filter counts every document.
    pub async fn count_documents(
        &self,
        filter: impl Into<Option<Document>>,
        options: CountBundle,
    ) -> Result<u64> {
        let (mut options, session) = options.resolve_options()?;
        self.default_selection_criteria(&mut options.selection_criteria);

        let op = CountDocuments::new(
            self.namespace(),
            filter.into().unwrap_or_default(),
            Some(options),
        )?;
        self.client()
            .execute_operation_in(op, session.as_ref())
            .await
    }

    /// Estimates the number of documents in the collection from its metadata. A collection that
    /// does not exist counts zero documents.
    pub async fn estimated_document_count(&self, options: EstimatedCountBundle) -> Result<u64> {
        let (mut options, session) = options.resolve_options()?;
        self.default_selection_criteria(&mut options.selection_criteria);

        let op = Count::new(self.namespace(), Some(options));
        self.client()
            .execute_operation_in(op, session.as_ref())
            .await
    }

    /// Finds the distinct values of the field specified by `field_name` across the collection.
    pub async fn distinct(
        &self,
        field_name: impl AsRef<str>,
        filter: impl Into<Option<Document>>,
        options: DistinctBundle,
    ) -> Result<Vec<Bson>> {
        let (mut options, session) = options.resolve_options()?;
        self.default_selection_criteria(&mut options.selection_criteria);

        let op = Distinct::new(
            self.namespace(),
            field_name.as_ref().to_string(),
            filter.into().unwrap_or_default(),
            Some(options),
        );
        self.client()
            .execute_operation_in(op, session.as_ref())
            .await
    }

    /// Runs an aggregation operation.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/aggregation/) for more
    /// information on aggregations.
    pub async fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: AggregateBundle,
    ) -> Result<Cursor<Document>> {
        let (mut options, session) = options.resolve_options()?;
        self.default_selection_criteria(&mut options.selection_criteria);

        let op = Aggregate::new(self.namespace(), pipeline, Some(options));
        self.client().execute_cursor_operation(op, session).await
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in this collection.
    /// A [`ChangeStream`] cannot be started on system collections.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams/) on change
    /// streams.
    pub async fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: ChangeStreamBundle,
    ) -> Result<ChangeStream<ChangeStreamEvent<T>>>
    where
        T: DeserializeOwned,
    {
        let (mut options, session) = options.resolve_options()?;
        self.default_selection_criteria(&mut options.selection_criteria);

        let args = WatchArgs {
            pipeline: pipeline.into_iter().collect(),
            target: self.namespace().into(),
            options: Some(options),
            all_changes_for_cluster: false,
        };
        self.client().execute_watch(args, session).await
    }
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync,
{
    /// Finds a single document in the collection matching `filter`.
    pub async fn find_one(
        &self,
        filter: impl Into<Option<Document>>,
        options: FindOneBundle,
    ) -> Result<Option<T>> {
        let (mut options, session) = options.resolve_options()?;
        self.default_selection_criteria(&mut options.selection_criteria);

        let op = FindOne::new(
            self.namespace(),
            filter.into().unwrap_or_default(),
            Some(options),
        );
        let document = self
            .client()
            .execute_operation_in(op, session.as_ref())
            .await?;
        document
            .map(|document| crate::bson::from_slice(document.as_bytes()).map_err(Error::from))
            .transpose()
    }
}

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(|e: Error| D::Error::custom(e.to_string()))
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(Error::invalid_argument(format!(
                "Missing one or more fields in namespace \"{}\"",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Namespace;

    #[test]
    fn namespace_parsing() {
        let ns: Namespace = "db.coll.with.dots".parse().unwrap();
        assert_eq!(ns, Namespace::new("db", "coll.with.dots"));
        assert_eq!(ns.to_string(), "db.coll.with.dots");

        assert!("db".parse::<Namespace>().is_err());
        assert!("db.".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
    }
}
