use std::{collections::HashMap, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    error::{ErrorKind, Result},
    sdam::{ServerAddress, ServerDescription, ServerType},
    serde_util,
};

/// Describes which servers are suitable for a given operation.
#[derive(Clone, derive_more::Display)]
#[derive_where(Debug)]
#[non_exhaustive]
pub enum SelectionCriteria {
    /// Select by server type, with optional tag sets and staleness bound.
    #[display("ReadPreference {_0}")]
    ReadPreference(ReadPreference),

    /// Select any server for which the predicate returns true.
    #[display("Custom predicate")]
    Predicate(#[derive_where(skip)] Predicate),
}

impl PartialEq for SelectionCriteria {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ReadPreference(r1), Self::ReadPreference(r2)) => r1 == r2,
            _ => false,
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl SelectionCriteria {
    /// Criteria matching only the server at `address`, used to route getMore and killCursors to
    /// the server that owns a cursor.
    pub(crate) fn from_address(address: ServerAddress) -> Self {
        SelectionCriteria::Predicate(Arc::new(move |server| server.address == address))
    }

    /// Whether the given server is eligible under these criteria. Staleness and tag filtering
    /// are left to the topology.
    pub fn is_suitable(&self, server: &ServerDescription) -> bool {
        match self {
            Self::ReadPreference(read_pref) => read_pref.accepts(server.server_type),
            Self::Predicate(predicate) => predicate(server),
        }
    }
}

impl<'de> Deserialize<'de> for SelectionCriteria {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(SelectionCriteria::ReadPreference(
            ReadPreference::deserialize(deserializer)?,
        ))
    }
}

/// Caller-supplied server filter.
pub type Predicate = Arc<dyn Send + Sync + Fn(&ServerDescription) -> bool>;

/// Which replica set members a read may be routed to.
///
/// Non-primary modes carry optional `ReadPreferenceOptions`. When forwarded to a mongos the
/// staleness bound is written as whole seconds under `maxStalenessSeconds`.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ReadPreference {
    /// Primary only.
    Primary,

    /// Secondaries only.
    Secondary {
        options: Option<ReadPreferenceOptions>,
    },

    /// The primary, or a secondary when no primary is known.
    PrimaryPreferred {
        options: Option<ReadPreferenceOptions>,
    },

    /// A secondary, or the primary when no secondary is known.
    SecondaryPreferred {
        options: Option<ReadPreferenceOptions>,
    },

    /// Any data-bearing member, nearest first.
    Nearest {
        options: Option<ReadPreferenceOptions>,
    },
}

impl std::fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mode = self.mode().to_string();
        mode[0..1].make_ascii_uppercase();
        write!(f, "{{ Mode: {}", mode)?;

        if let Some(options) = self.options() {
            if let Some(ref tag_sets) = options.tag_sets {
                write!(f, ", Tag Sets: {:?}", tag_sets)?;
            }
            if let Some(ref max_staleness) = options.max_staleness {
                write!(f, ", Max Staleness: {:?}", max_staleness)?;
            }
        }

        write!(f, " }}")
    }
}

impl<'de> Deserialize<'de> for ReadPreference {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", deny_unknown_fields)]
        struct ReadPreferenceHelper {
            mode: String,
            #[serde(flatten)]
            options: ReadPreferenceOptions,
        }
        let helper = ReadPreferenceHelper::deserialize(deserializer)?;
        match helper.mode.to_ascii_lowercase().as_str() {
            "primary" => {
                if !helper.options.is_default() {
                    return Err(D::Error::custom(format!(
                        "cannot specify options for primary read preference, got {:?}",
                        helper.options
                    )));
                }
                Ok(ReadPreference::Primary)
            }
            "secondary" => Ok(ReadPreference::Secondary {
                options: Some(helper.options),
            }),
            "primarypreferred" => Ok(ReadPreference::PrimaryPreferred {
                options: Some(helper.options),
            }),
            "secondarypreferred" => Ok(ReadPreference::SecondaryPreferred {
                options: Some(helper.options),
            }),
            "nearest" => Ok(ReadPreference::Nearest {
                options: Some(helper.options),
            }),
            other => Err(D::Error::custom(format!(
                "Unknown read preference mode: {}",
                other
            ))),
        }
    }
}

impl Serialize for ReadPreference {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[serde_with::skip_serializing_none]
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ReadPreferenceHelper<'a> {
            mode: &'static str,
            #[serde(flatten)]
            options: Option<&'a ReadPreferenceOptions>,
        }

        let helper = ReadPreferenceHelper {
            mode: self.mode(),
            options: self.options(),
        };
        helper.serialize(serializer)
    }
}

/// Extra constraints carried by the non-primary modes.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ReadPreferenceOptions {
    /// Tag sets tried in order; the first one matching any member wins.
    #[serde(alias = "tag_sets")]
    pub tag_sets: Option<Vec<TagSet>>,

    /// Upper bound on replication lag for an eligible secondary.
    #[serde(
        rename = "maxStalenessSeconds",
        default,
        with = "serde_util::duration_option_as_int_seconds"
    )]
    pub max_staleness: Option<Duration>,
}

impl ReadPreferenceOptions {
    pub(crate) fn is_default(&self) -> bool {
        self.max_staleness.is_none()
            && self
                .tag_sets
                .as_ref()
                .map(|ts| ts.is_empty() || ts[..] == [HashMap::default()])
                .unwrap_or(true)
    }
}

impl ReadPreference {
    pub(crate) fn mode(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary { .. } => "secondary",
            Self::PrimaryPreferred { .. } => "primaryPreferred",
            Self::SecondaryPreferred { .. } => "secondaryPreferred",
            Self::Nearest { .. } => "nearest",
        }
    }

    pub(crate) fn options(&self) -> Option<&ReadPreferenceOptions> {
        match self {
            Self::Primary => None,
            Self::Secondary { options }
            | Self::PrimaryPreferred { options }
            | Self::SecondaryPreferred { options }
            | Self::Nearest { options } => options.as_ref(),
        }
    }

    pub(crate) fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Whether a server of the given type can serve reads under this mode.
    pub(crate) fn accepts(&self, server_type: ServerType) -> bool {
        match server_type {
            ServerType::Standalone | ServerType::Mongos | ServerType::LoadBalancer => true,
            ServerType::RsPrimary => !matches!(self, Self::Secondary { .. }),
            ServerType::RsSecondary => !self.is_primary(),
            _ => false,
        }
    }

    /// Adds tag sets to this read preference. Fails for `Primary`.
    pub fn with_tags(mut self, tag_sets: Vec<TagSet>) -> Result<Self> {
        let options = match self {
            Self::Primary => {
                return Err(ErrorKind::InvalidArgument {
                    message: "read preference tags can only be specified when a non-primary mode \
                              is specified"
                        .to_string(),
                }
                .into());
            }
            Self::Secondary { ref mut options } => options,
            Self::PrimaryPreferred { ref mut options } => options,
            Self::SecondaryPreferred { ref mut options } => options,
            Self::Nearest { ref mut options } => options,
        };

        options.get_or_insert_with(Default::default).tag_sets = Some(tag_sets);

        Ok(self)
    }
}

/// Member tags that must all be present on a selected server.
pub type TagSet = HashMap<String, String>;

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{ReadPreference, ReadPreferenceOptions, SelectionCriteria};
    use crate::{
        bson::doc,
        sdam::{ServerAddress, ServerDescription, ServerType},
    };

    #[test]
    fn max_staleness_serialized_as_seconds() {
        let read_pref = ReadPreference::Secondary {
            options: Some(
                ReadPreferenceOptions::builder()
                    .max_staleness(Duration::from_secs(120))
                    .build(),
            ),
        };
        let doc = crate::bson::to_document(&read_pref).unwrap();

        assert_eq!(
            doc,
            doc! { "mode": "secondary", "maxStalenessSeconds": 120 }
        );
    }

    #[test]
    fn primary_rejects_options() {
        let result: std::result::Result<ReadPreference, _> =
            crate::bson::from_document(doc! { "mode": "primary", "maxStalenessSeconds": 90 });
        assert!(result.is_err());
        assert!(ReadPreference::Primary.with_tags(vec![]).is_err());
    }

    #[test]
    fn mode_parsing_is_case_insensitive() {
        let read_pref: ReadPreference =
            crate::bson::from_document(doc! { "mode": "SecondaryPreferred" }).unwrap();
        assert_eq!(read_pref.mode(), "secondaryPreferred");
    }

    #[test]
    fn address_predicate() {
        let address = ServerAddress::parse("a:27017").unwrap();
        let criteria = SelectionCriteria::from_address(address.clone());
        let matching = ServerDescription::new(address, ServerType::RsSecondary);
        let other = ServerDescription::new(ServerAddress::parse("b:27017").unwrap(), ServerType::RsSecondary);
        assert!(criteria.is_suitable(&matching));
        assert!(!criteria.is_suitable(&other));
    }

    #[test]
    fn read_preference_eligibility() {
        let secondary = ReadPreference::Secondary { options: None };
        assert!(!secondary.accepts(ServerType::RsPrimary));
        assert!(secondary.accepts(ServerType::RsSecondary));
        assert!(ReadPreference::Primary.accepts(ServerType::Mongos));
        assert!(!ReadPreference::Primary.accepts(ServerType::RsSecondary));
        assert!(!ReadPreference::Nearest { options: None }.accepts(ServerType::RsArbiter));
    }
}
