//! Prop lifecycle entries carried by events.

use serde::{Deserialize, Serialize};

use super::{CharacterId, PropId};

/// One step in a prop's lifecycle, recorded on the event where it happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropInteraction {
    pub prop: PropId,

    /// What happens to the prop (`found`, `hidden`, `handed_over`, ...).
    pub action: String,

    #[serde(default)]
    pub location: Option<String>,

    /// The character handling the prop, if anyone.
    #[serde(default)]
    pub character: Option<CharacterId>,

    #[serde(default)]
    pub visibility: Option<String>,
}

impl PropInteraction {
    pub fn new(prop: impl Into<PropId>, action: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            action: action.into(),
            location: None,
            character: None,
            visibility: None,
        }
    }

    pub fn by(mut self, character: impl Into<CharacterId>) -> Self {
        self.character = Some(character.into());
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = Some(visibility.into());
        self
    }

    /// Whether `character` physically handles the prop here.
    pub fn handled_by(&self, character: &CharacterId) -> bool {
        self.character.as_ref() == Some(character)
    }
}
