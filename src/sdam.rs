//! The topology contracts this crate dispatches against.
//!
//! Discovery and monitoring live outside this crate. An embedding driver implements
//! [`Topology`] and [`Server`] over its own view of the deployment, and the dispatch layer only
//! asks them to pick a server and lease a connection.

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    cmap::Connection,
    error::{Error, Result},
    selection_criteria::SelectionCriteria,
    BoxFuture,
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

/// The address of a server in the deployment.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub struct ServerAddress {
    /// The hostname of the address.
    pub host: String,

    /// The port of the address.
    ///
    /// The default is 27017.
    pub port: Option<u16>,
}

impl ServerAddress {
    /// Creates an address from its parts.
    pub fn new(host: impl Into<String>, port: impl Into<Option<u16>>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Parses an address string of the form `host[:port]`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');

        let host = match parts.next() {
            Some(part) if !part.is_empty() => part,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "invalid server address: \"{}\"",
                    address
                )))
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| {
                    Error::invalid_argument(format!(
                        "port must be a valid 16-bit unsigned integer, instead got: {}",
                        part
                    ))
                })?;
                if port == 0 || parts.next().is_some() {
                    return Err(Error::invalid_argument(format!(
                        "invalid server address: \"{}\"",
                        address
                    )));
                }
                Some(port)
            }
            None => None,
        };

        Ok(Self::new(host, port))
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port.unwrap_or(DEFAULT_PORT) == other.port.unwrap_or(DEFAULT_PORT)
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.host.hash(state);
        self.port.unwrap_or(DEFAULT_PORT).hash(state);
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port.unwrap_or(DEFAULT_PORT))
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str()).map_err(|e| D::Error::custom(format!("{}", e)))
    }
}

impl Serialize for ServerAddress {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// The role a server plays in its deployment.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the replica
    /// set config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A load-balancing proxy between the driver and the MongoDB deployment.
    LoadBalancer,

    /// A server that the driver hasn't yet communicated with or can't connect to.
    #[default]
    Unknown,
}

/// A snapshot of what the topology knows about one server.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ServerDescription {
    /// The server's address.
    pub address: ServerAddress,

    /// The server's role.
    pub server_type: ServerType,

    /// The highest wire protocol version the server speaks.
    pub max_wire_version: Option<i32>,

    /// How long the server keeps idle logical sessions alive.
    pub logical_session_timeout: Option<Duration>,
}

impl ServerDescription {
    /// Creates a description with no wire version or session information.
    pub fn new(address: ServerAddress, server_type: ServerType) -> Self {
        Self {
            address,
            server_type,
            max_wire_version: None,
            logical_session_timeout: None,
        }
    }

    /// Sets the wire version the server reported.
    pub fn with_max_wire_version(mut self, version: i32) -> Self {
        self.max_wire_version = Some(version);
        self
    }

    /// Sets the logical session timeout the server reported.
    pub fn with_logical_session_timeout(mut self, timeout: Duration) -> Self {
        self.logical_session_timeout = Some(timeout);
        self
    }
}

/// A view of a deployment that can choose servers for operations.
pub trait Topology: Send + Sync {
    /// Waits for a server matching `criteria`. Implementations may wait indefinitely; the
    /// dispatch layer bounds the wait with the client's server selection timeout.
    fn select_server<'a>(
        &'a self,
        criteria: &'a SelectionCriteria,
    ) -> BoxFuture<'a, Result<Arc<dyn Server>>>;

    /// Whether every data-bearing member of the deployment supports logical sessions.
    fn supports_sessions(&self) -> bool;

    /// The smallest logical session timeout reported by the deployment.
    fn logical_session_timeout(&self) -> Option<Duration> {
        None
    }
}

/// A server chosen by a [`Topology`].
pub trait Server: Send + Sync {
    /// The topology's current description of this server.
    fn description(&self) -> ServerDescription;

    /// Leases a connection to this server. The returned connection must be closed exactly once.
    fn connection(&self) -> BoxFuture<'_, Result<Box<dyn Connection>>>;
}
