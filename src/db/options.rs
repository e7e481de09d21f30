use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{
    bundle::{bundle_setters, Bundle, BundleOption},
    error::Result,
    selection_criteria::SelectionCriteria,
};

/// These are the valid options for creating a [`Database`](crate::Database) with
/// [`Client::database_with_options`](crate::Client::database_with_options).
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DatabaseOptions {
    /// The default read preference for operations.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a [`Database::run_command`](crate::Database::run_command)
/// operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct RunCommandOptions {
    /// The criteria used to select a server for the command. Defaults to the primary.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// An atomic option to [`Database::run_command`](crate::Database::run_command).
#[allow(missing_docs)]
#[derive(Clone, Debug, derive_more::Display)]
#[non_exhaustive]
pub enum RunCommandOption {
    #[display("readPreference: {}", _0)]
    ReadPreference(SelectionCriteria),
}

impl BundleOption for RunCommandOption {
    type Options = RunCommandOptions;

    fn kind(&self) -> &'static str {
        match self {
            Self::ReadPreference(_) => "$readPreference",
        }
    }

    fn apply(self, options: &mut RunCommandOptions) -> Result<()> {
        match self {
            Self::ReadPreference(v) => options.selection_criteria = Some(v),
        }
        Ok(())
    }
}

bundle_setters! {
    RunCommandOption;
    /// Appends a read preference.
    selection_criteria => ReadPreference(SelectionCriteria),
}

/// A bundle of [`RunCommandOption`]s.
pub type RunCommandBundle = Bundle<RunCommandOption>;
