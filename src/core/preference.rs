use crate::core::memory::Compartment;
use crate::core::turn::TurnSource;
use serde::{Deserialize, Serialize};
use strum::Display;

/// First-person statements of a stable preference.
const EXPLICIT_PATTERNS: &[&str] = &[
    "i prefer",
    "i always",
    "i never",
    "i like",
    "i love",
    "i hate",
    "i dislike",
    "i don't like",
    "i do not like",
    "i want",
    "my favorite",
    "my favourite",
    "my preference",
    "i'd rather",
    "i would rather",
    "please always",
    "please never",
    "from now on",
];

/// Preference-shaped language without a first-person commitment.
const PREFERENCE_LANGUAGE: &[&str] = &[
    "prefer",
    "prefers",
    "preferred",
    "rather",
    "favorite",
    "favourite",
    "likes",
    "usually",
    "tends to",
    "tend to",
    "seems to",
    "enjoys",
    "dislikes",
    "always",
    "never",
];

/// Qualifiers that make a statement provisional.
const HEDGES: &[&str] = &[
    "maybe",
    "perhaps",
    "sometimes",
    "might",
    "probably",
    "i guess",
    "i think",
    "not sure",
    "for now",
    "this time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PreferenceClass {
    Explicit,
    InferredConfirmRequired,
    InferredSilent,
    Behavioral,
}

impl PreferenceClass {
    /// Compartment a statement of this class may be written to.
    pub const fn target(self) -> Compartment {
        match self {
            Self::Explicit => Compartment::SharedReference,
            Self::InferredConfirmRequired | Self::InferredSilent => Compartment::WorkingSet,
            Self::Behavioral => Compartment::EpisodicTrace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceVerdict {
    pub class: PreferenceClass,
    /// May be promoted to Shared Reference right now.
    pub can_canonize: bool,
    /// May be promoted only after the user confirms it.
    pub needs_confirmation: bool,
    pub target: Compartment,
}

impl From<PreferenceClass> for PreferenceVerdict {
    fn from(class: PreferenceClass) -> Self {
        Self {
            class,
            can_canonize: class == PreferenceClass::Explicit,
            needs_confirmation: class == PreferenceClass::InferredConfirmRequired,
            target: class.target(),
        }
    }
}

/// Tier a statement. Only the user, speaking directly and without
/// hedging, produces an `Explicit` preference.
pub fn classify(statement: &str, source: TurnSource) -> PreferenceVerdict {
    if source == TurnSource::Observation {
        return PreferenceClass::Behavioral.into();
    }

    let text = normalize(statement);
    let hedged = statement.trim_end().ends_with('?') || contains_any(&text, HEDGES);
    let first_person = contains_any(&text, EXPLICIT_PATTERNS);

    let class = if first_person && !hedged && source == TurnSource::User {
        PreferenceClass::Explicit
    } else if first_person || contains_any(&text, PREFERENCE_LANGUAGE) {
        PreferenceClass::InferredConfirmRequired
    } else {
        PreferenceClass::InferredSilent
    };
    class.into()
}

/// Lowercase words separated by single spaces, padded at both ends so
/// phrase matches land on word boundaries.
fn normalize(statement: &str) -> String {
    let cleaned: String = statement
        .to_lowercase()
        .replace('\u{2019}', "'")
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    let words = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    format!(" {words} ")
}

fn contains_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases
        .iter()
        .any(|phrase| normalized.contains(&format!(" {phrase} ")))
}
