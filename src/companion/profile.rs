//! Companion model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::companion::traits::PersonalityTraits;
use crate::core::ids::{CompanionId, OwnerId};

/// A user's companion: identity, personality, and turn bookkeeping.
///
/// Created once at setup time; afterwards only `apply_turn` and
/// deactivation mutate it. The communication style is derived from the
/// traits at creation and never independently settable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    /// Unique companion identifier.
    pub id: CompanionId,
    /// Owning user, unique per companion.
    pub owner_id: OwnerId,
    /// Display name.
    pub name: String,
    /// Validated personality traits.
    pub traits: PersonalityTraits,
    /// Interest topics.
    pub interests: Vec<String>,
    /// Derived communication-style label.
    pub communication_style: String,
    /// Generated free-text personality description.
    pub description: String,
    /// Monotonic relationship counter.
    pub relationship_level: u32,
    /// Number of completed turns.
    pub interaction_count: u64,
    /// Timestamp of the last completed turn.
    pub last_interaction_at: Option<DateTime<Utc>>,
    /// Soft-deactivation flag; memories are kept either way.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Companion {
    /// Build a new active companion with derived style.
    #[must_use]
    pub fn new(
        owner_id: OwnerId,
        name: impl Into<String>,
        traits: PersonalityTraits,
        interests: Vec<String>,
        description: String,
    ) -> Self {
        Self {
            id: CompanionId::new(),
            owner_id,
            name: name.into(),
            communication_style: traits.communication_style(),
            traits,
            interests,
            description,
            relationship_level: 0,
            interaction_count: 0,
            last_interaction_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Apply the bookkeeping for one completed turn.
    pub fn apply_turn(&mut self, now: DateTime<Utc>) {
        self.interaction_count = self.interaction_count.saturating_add(1);
        self.relationship_level = self.relationship_level.saturating_add(1);
        self.last_interaction_at = Some(now);
    }
}
