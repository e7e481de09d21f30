use serde::{Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

/// Language-specific string comparison rules for an operation. See the MongoDB
/// [documentation](https://www.mongodb.com/docs/manual/reference/collation/) for what each field
/// controls.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct Collation {
    /// The ICU locale, e.g. `"fr"` or `"en_US"`.
    #[builder(!default)]
    pub locale: String,

    /// The ICU comparison level.
    pub strength: Option<CollationStrength>,

    /// Whether to add a comparison level for case differences.
    pub case_level: Option<bool>,

    /// The order of upper and lower case during tertiary comparisons.
    pub case_first: Option<CollationCaseFirst>,

    /// Whether numeric strings compare as numbers.
    pub numeric_ordering: Option<bool>,

    /// Whether strings with diacritics sort from the back of the string.
    pub backwards: Option<bool>,
}

/// The ICU comparison level, sent over the wire as an integer from 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CollationStrength {
    /// Base characters only.
    Primary,
    /// Base characters and accents.
    Secondary,
    /// Base characters, accents, and case.
    Tertiary,
    /// Adds punctuation when it is otherwise ignored.
    Quaternary,
    /// Breaks remaining ties by code point.
    Identical,
}

impl CollationStrength {
    fn level(self) -> i32 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Tertiary => 3,
            Self::Quaternary => 4,
            Self::Identical => 5,
        }
    }
}

impl Serialize for CollationStrength {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.level())
    }
}

impl<'de> Deserialize<'de> for CollationStrength {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            1 => Ok(Self::Primary),
            2 => Ok(Self::Secondary),
            3 => Ok(Self::Tertiary),
            4 => Ok(Self::Quaternary),
            5 => Ok(Self::Identical),
            other => Err(serde::de::Error::custom(format!(
                "invalid collation strength: {}",
                other
            ))),
        }
    }
}

/// Which case sorts first during tertiary comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum CollationCaseFirst {
    /// Uppercase sorts before lowercase.
    Upper,
    /// Lowercase sorts before uppercase.
    Lower,
    /// The locale's default ordering.
    Off,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bson::doc;

    #[test]
    fn strength_serializes_as_level() {
        let collation = Collation::builder()
            .locale("fr")
            .strength(CollationStrength::Secondary)
            .case_first(CollationCaseFirst::Upper)
            .build();
        assert_eq!(
            crate::bson::to_document(&collation).unwrap(),
            doc! { "locale": "fr", "strength": 2, "caseFirst": "upper" }
        );
    }
}
