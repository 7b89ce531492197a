use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing label returned by a node's post phase.
///
/// Actions are open strings: the node producing one and the flow wiring that
/// consumes it agree on names out of band. An empty label is the same as
/// [`Action::DEFAULT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Action(String);

impl Action {
    pub const DEFAULT: &'static str = "default";

    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        if label.is_empty() {
            Self(Self::DEFAULT.to_string())
        } else {
            Self(label)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Action {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Action::new(s)
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Action::new(s)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.0
    }
}

impl PartialEq<str> for Action {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Action {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
