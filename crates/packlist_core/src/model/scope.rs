//! Store scope routing tag.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Which physical store currently owns an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Single-user data mirrored to the user's private remote zone.
    Private,
    /// Data covered by a share grant, visible to invited participants.
    Shared,
}

impl Scope {
    /// Both scopes in sync order.
    pub const ALL: [Scope; 2] = [Scope::Private, Scope::Shared];

    /// Stable string id used in logs and persisted sync state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Shared => "shared",
        }
    }

    /// SQLite schema name the physical store is attached under.
    pub(crate) fn schema(self) -> &'static str {
        match self {
            Self::Private => "main",
            Self::Shared => "shared",
        }
    }

    /// The opposite scope.
    pub fn other(self) -> Self {
        match self {
            Self::Private => Self::Shared,
            Self::Shared => Self::Private,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Scope;

    #[test]
    fn schemas_are_distinct_per_scope() {
        assert_eq!(Scope::Private.schema(), "main");
        assert_eq!(Scope::Shared.schema(), "shared");
        assert_eq!(Scope::Private.other(), Scope::Shared);
        assert_eq!(Scope::Shared.other(), Scope::Private);
    }
}
