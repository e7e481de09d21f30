use std::time::Duration;

use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{selection_criteria::SelectionCriteria, serde_util};

pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Contains the options that can be used to create a new [`Client`](../struct.Client.html).
///
/// The options can be built in code or deserialized from a configuration document, in which case
/// durations are given in milliseconds:
///
/// ```rust
/// # use mongodb_dispatch::{bson::doc, options::ClientOptions};
/// let options: ClientOptions = mongodb_dispatch::bson::from_document(doc! {
///     "appName": "reporting",
///     "serverSelectionTimeoutMS": 5000,
///     "readPreference": { "mode": "secondaryPreferred" },
/// })
/// .unwrap();
/// assert_eq!(options.app_name.as_deref(), Some("reporting"));
/// ```
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ClientOptions {
    /// The application name that the Client will send to the server as part of the handshake.
    /// This can be used in combination with the server logs to determine which Client is
    /// connected to a server.
    pub app_name: Option<String>,

    /// The amount of time the Client should attempt to select a server for an operation before
    /// timing out.
    ///
    /// The default value is 30 seconds.
    #[serde(
        rename = "serverSelectionTimeoutMS",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub server_selection_timeout: Option<Duration>,

    /// The default selection criteria for operations that do not specify their own. The default
    /// is the primary.
    #[serde(rename = "readPreference")]
    pub selection_criteria: Option<SelectionCriteria>,

    /// The maximum number of bytes of a command or reply rendered into a tracing event. Longer
    /// documents are truncated.
    ///
    /// The default value is 1000.
    #[serde(rename = "maxDocumentLengthForTracing")]
    pub tracing_max_document_length_bytes: Option<usize>,
}

/// Contains the options that can be used to create a new
/// [`ClientSession`](../struct.ClientSession.html).
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct SessionOptions {
    /// The default options to use for transactions started on this session.
    ///
    /// If these options are not specified, they will be inherited from the
    /// [`Client`](../struct.Client.html) associated with this session.
    pub default_transaction_options: Option<TransactionOptions>,

    /// If true, all read operations performed using this client session will share the same
    /// causal consistency guarantee.
    ///
    /// The default value is true.
    pub causal_consistency: Option<bool>,
}

/// Contains the options that can be used for a transaction.
#[derive(Debug, Default, Clone, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TransactionOptions {
    /// The selection criteria to use for all read operations in a transaction. Reads in a
    /// transaction must target the primary.
    #[serde(rename = "readPreference")]
    pub selection_criteria: Option<SelectionCriteria>,

    /// The maximum amount of time to allow a single commitTransaction to run.
    #[serde(
        rename = "maxCommitTimeMS",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_commit_time: Option<Duration>,
}
