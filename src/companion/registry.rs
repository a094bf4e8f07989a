//! Companion registry: creation, lookup, turn bookkeeping, deactivation.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::info;

use crate::companion::profile::Companion;
use crate::companion::store::CompanionStore;
use crate::companion::traits::PersonalityTraits;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{CompanionId, OwnerId, TurnId};
use crate::providers::generation::GenerationProvider;

/// Capacity of the per-process turn idempotency guard.
const TURN_GUARD_CAPACITY: usize = 1024;

/// Token budget for the one-time description generation.
const DESCRIPTION_MAX_TOKENS: u32 = 256;

/// Registry owning companion identity and lifecycle.
///
/// The description is generated by exactly one provider call at creation
/// time and persisted; it is never regenerated implicitly. A failed
/// description call fails creation — the caller decides whether to retry.
pub struct CompanionRegistry {
    store: Arc<dyn CompanionStore>,
    generation: Arc<dyn GenerationProvider>,
    applied_turns: Mutex<LruCache<(CompanionId, TurnId), ()>>,
}

impl CompanionRegistry {
    /// Create a registry over the given store and generation provider.
    ///
    /// # Errors
    /// Returns an error if the idempotency guard cannot be sized.
    pub fn new(
        store: Arc<dyn CompanionStore>,
        generation: Arc<dyn GenerationProvider>,
    ) -> EngineResult<Self> {
        let capacity = NonZeroUsize::new(TURN_GUARD_CAPACITY).ok_or_else(|| {
            EngineError::InvalidConfig("turn guard capacity must be > 0".to_string())
        })?;
        Ok(Self {
            store,
            generation,
            applied_turns: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Create a companion for an owner.
    ///
    /// # Errors
    /// Returns a validation error for malformed input or a duplicate owner,
    /// and a generation failure if the description call fails.
    pub async fn create(
        &self,
        owner_id: OwnerId,
        name: &str,
        traits: PersonalityTraits,
        interests: Vec<String>,
    ) -> EngineResult<Companion> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation(
                "companion name must not be empty".to_string(),
            ));
        }
        traits.validate()?;

        if self.store.get_by_owner(owner_id).await?.is_some() {
            return Err(EngineError::Validation(format!(
                "owner {owner_id} already has a companion"
            )));
        }

        let description = self.generate_description(name, &traits, &interests).await?;
        let companion = Companion::new(owner_id, name, traits, interests, description);
        self.store.insert(companion.clone()).await?;
        info!(companion = %companion.id, owner = %owner_id, "Created companion");
        Ok(companion)
    }

    /// Fetch a companion by id.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub async fn get(&self, id: CompanionId) -> EngineResult<Companion> {
        self.store
            .get(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Record one completed turn: interaction count, relationship level,
    /// last-interaction timestamp. At most once per `(companion, turn)`.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids or a storage error on update.
    pub async fn record_turn(&self, id: CompanionId, turn_id: TurnId) -> EngineResult<()> {
        let key = (id, turn_id);
        {
            let mut guard = self.applied_turns.lock().await;
            if guard.contains(&key) {
                return Ok(());
            }
        }

        let mut companion = self.get(id).await?;
        companion.apply_turn(Utc::now());
        self.store.update(companion).await?;

        // Marked applied only once the update landed, so a failed update
        // stays retryable.
        let mut guard = self.applied_turns.lock().await;
        guard.put(key, ());
        Ok(())
    }

    /// Soft-deactivate a companion. Memories are untouched.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids or a storage error on update.
    pub async fn deactivate(&self, id: CompanionId) -> EngineResult<()> {
        let mut companion = self.get(id).await?;
        companion.active = false;
        self.store.update(companion).await?;
        info!(companion = %id, "Deactivated companion");
        Ok(())
    }

    async fn generate_description(
        &self,
        name: &str,
        traits: &PersonalityTraits,
        interests: &[String],
    ) -> EngineResult<String> {
        let traits_line = traits
            .named()
            .iter()
            .map(|(trait_name, value)| format!("{trait_name}: {value:.2}"))
            .collect::<Vec<_>>()
            .join(", ");
        let interests_line = if interests.is_empty() {
            "none listed".to_string()
        } else {
            interests.join(", ")
        };

        let prompt = format!(
            "Write a short first-person personality description (2-3 sentences) \
             for an AI companion named {name}. Personality traits: {traits_line}. \
             Interests: {interests_line}. Speak as the companion."
        );
        let output = self
            .generation
            .generate(&prompt, DESCRIPTION_MAX_TOKENS, 0.7)
            .await?;
        Ok(output.text.trim().to_string())
    }
}
