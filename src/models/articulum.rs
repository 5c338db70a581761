use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::articulums;

/// The articulum lifecycle. Stored as `TEXT` in `articulums.state`; the mapping
/// to/from that column lives here rather than in the schema so the state graph
/// (legal transitions, terminal-ness) stays next to the type that enumerates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticulumState {
    New,
    CatalogParsing,
    CatalogParsed,
    Validating,
    Validated,
    ObjectParsing,
    RejectedByMinCount,
}

impl ArticulumState {
    pub const ALL: [ArticulumState; 7] = [
        ArticulumState::New,
        ArticulumState::CatalogParsing,
        ArticulumState::CatalogParsed,
        ArticulumState::Validating,
        ArticulumState::Validated,
        ArticulumState::ObjectParsing,
        ArticulumState::RejectedByMinCount,
    ];

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ArticulumState::ObjectParsing | ArticulumState::RejectedByMinCount
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArticulumState::New => "NEW",
            ArticulumState::CatalogParsing => "CATALOG_PARSING",
            ArticulumState::CatalogParsed => "CATALOG_PARSED",
            ArticulumState::Validating => "VALIDATING",
            ArticulumState::Validated => "VALIDATED",
            ArticulumState::ObjectParsing => "OBJECT_PARSING",
            ArticulumState::RejectedByMinCount => "REJECTED_BY_MIN_COUNT",
        }
    }
}

impl std::fmt::Display for ArticulumState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored `state` string doesn't match any known variant.
/// Surfacing this as its own type (rather than `Option`) keeps "unknown state in
/// the database" distinguishable from "articulum not found" at call sites.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized articulum state: {0}")]
pub struct UnknownArticulumState(pub String);

impl std::str::FromStr for ArticulumState {
    type Err = UnknownArticulumState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(ArticulumState::New),
            "CATALOG_PARSING" => Ok(ArticulumState::CatalogParsing),
            "CATALOG_PARSED" => Ok(ArticulumState::CatalogParsed),
            "VALIDATING" => Ok(ArticulumState::Validating),
            "VALIDATED" => Ok(ArticulumState::Validated),
            "OBJECT_PARSING" => Ok(ArticulumState::ObjectParsing),
            "REJECTED_BY_MIN_COUNT" => Ok(ArticulumState::RejectedByMinCount),
            other => Err(UnknownArticulumState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = articulums)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Articulum {
    pub id: i32,
    pub articulum: String,
    pub state: String,
    pub state_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Articulum {
    /// Parse the stored state string. Panics only if the database contains a
    /// value outside the enum's range, which should be unreachable given the
    /// state machine is the sole writer of this column.
    pub fn state(&self) -> ArticulumState {
        self.state
            .parse()
            .expect("articulums.state contains a value outside ArticulumState")
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = articulums)]
pub struct NewArticulum<'a> {
    pub articulum: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant_through_its_string_form() {
        for state in ArticulumState::ALL {
            assert_eq!(state.as_str().parse::<ArticulumState>().unwrap(), state);
        }
    }

    #[test]
    fn only_object_parsing_and_rejected_are_terminal() {
        for state in ArticulumState::ALL {
            let expected = matches!(
                state,
                ArticulumState::ObjectParsing | ArticulumState::RejectedByMinCount
            );
            assert_eq!(state.is_terminal(), expected, "state={state}");
        }
    }

    #[test]
    fn unknown_state_string_is_rejected() {
        assert!("SOMETHING_ELSE".parse::<ArticulumState>().is_err());
    }
}
