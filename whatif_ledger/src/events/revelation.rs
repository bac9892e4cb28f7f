//! Revelations - the channels through which an event exposes a fact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entities::{CharacterId, FactKey, PropId};

/// An in-fiction act of communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telling {
    pub teller: CharacterId,
    pub listeners: Vec<CharacterId>,
}

/// A fact an event exposes, and who it reaches by which channel.
///
/// Who ends up knowing the fact (and how sure they are) is decided by the
/// knowledge projector; the revelation only records the exposure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revelation {
    pub fact_key: FactKey,

    /// Plainly visible to the characters present (and audible to those nearby).
    #[serde(default = "default_observable")]
    pub observable: bool,

    #[serde(default)]
    pub told: Vec<Telling>,

    /// A prop whose state gives the fact away to whoever handles it.
    #[serde(default)]
    pub evidence: Option<PropId>,

    #[serde(default)]
    pub inferred_by: Vec<CharacterId>,

    #[serde(default)]
    pub rumored_to: Vec<CharacterId>,
}

fn default_observable() -> bool {
    true
}

impl Revelation {
    /// A fact visible to everyone present.
    pub fn new(fact_key: impl Into<FactKey>) -> Self {
        Self {
            fact_key: fact_key.into(),
            observable: true,
            told: Vec::new(),
            evidence: None,
            inferred_by: Vec::new(),
            rumored_to: Vec::new(),
        }
    }

    /// A fact that nobody present can see directly.
    pub fn hidden(fact_key: impl Into<FactKey>) -> Self {
        Self::new(fact_key).unobserved()
    }

    pub fn unobserved(mut self) -> Self {
        self.observable = false;
        self
    }

    pub fn told_by<I, C>(mut self, teller: impl Into<CharacterId>, listeners: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.told.push(Telling {
            teller: teller.into(),
            listeners: listeners.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn via_evidence(mut self, prop: impl Into<PropId>) -> Self {
        self.evidence = Some(prop.into());
        self
    }

    pub fn inferred_by<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.inferred_by.extend(characters.into_iter().map(Into::into));
        self
    }

    pub fn rumored_to<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.rumored_to.extend(characters.into_iter().map(Into::into));
        self
    }

    /// Characters named by the revelation itself.
    pub fn participants(&self) -> BTreeSet<CharacterId> {
        let mut out = BTreeSet::new();
        for telling in &self.told {
            out.insert(telling.teller.clone());
            out.extend(telling.listeners.iter().cloned());
        }
        out.extend(self.inferred_by.iter().cloned());
        out.extend(self.rumored_to.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observable_defaults_on_deserialize() {
        let rev: Revelation = serde_json::from_str(r#"{"fact_key":"jane.lied"}"#).unwrap();
        assert!(rev.observable);
        assert!(rev.told.is_empty());
    }

    #[test]
    fn test_hidden_revelation() {
        let rev = Revelation::hidden("jane.has_secret").inferred_by(["marcus"]);
        assert!(!rev.observable);
        assert_eq!(rev.inferred_by, vec![CharacterId::from("marcus")]);
    }
}
