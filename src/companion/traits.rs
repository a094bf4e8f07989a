//! Personality traits and communication-style derivation.

use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, EngineResult};

/// Threshold above which a trait contributes a style label.
const STYLE_THRESHOLD: f64 = 0.7;

/// Style label used when no trait crosses the threshold.
const DEFAULT_STYLE: &str = "balanced and friendly";

/// Validated personality traits, each in [0, 1].
///
/// Fixed trait names keep the communication-style derivation deterministic
/// and testable, instead of an open string-to-float map.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonalityTraits {
    /// Sociability and energy in conversation.
    pub extraversion: f64,
    /// Warmth and cooperativeness.
    pub agreeableness: f64,
    /// Curiosity and receptiveness to new topics.
    pub openness: f64,
    /// Care and reliability in responses.
    pub conscientiousness: f64,
}

impl PersonalityTraits {
    /// Create traits after bounds-checking every value.
    ///
    /// # Errors
    /// Returns a validation error if any trait is outside [0, 1].
    pub fn new(
        extraversion: f64,
        agreeableness: f64,
        openness: f64,
        conscientiousness: f64,
    ) -> EngineResult<Self> {
        let traits = Self {
            extraversion,
            agreeableness,
            openness,
            conscientiousness,
        };
        traits.validate()?;
        Ok(traits)
    }

    /// Validate that every trait is a finite value in [0, 1].
    ///
    /// # Errors
    /// Returns a validation error naming the offending trait.
    pub fn validate(&self) -> EngineResult<()> {
        for (name, value) in self.named() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Validation(format!(
                    "trait {name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Trait values paired with their stable names, in derivation order.
    #[must_use]
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("extraversion", self.extraversion),
            ("agreeableness", self.agreeableness),
            ("openness", self.openness),
            ("conscientiousness", self.conscientiousness),
        ]
    }

    /// Derive the communication-style label from the rule table.
    ///
    /// Rules fire in a fixed order and concatenate with ", ";
    /// the default label applies when none trigger.
    #[must_use]
    pub fn communication_style(&self) -> String {
        let mut labels = Vec::new();
        if self.extraversion > STYLE_THRESHOLD {
            labels.push("enthusiastic");
        }
        if self.agreeableness > STYLE_THRESHOLD {
            labels.push("warm and supportive");
        }
        if self.openness > STYLE_THRESHOLD {
            labels.push("curious and open-minded");
        }
        if self.conscientiousness > STYLE_THRESHOLD {
            labels.push("organized and reliable");
        }

        if labels.is_empty() {
            DEFAULT_STYLE.to_string()
        } else {
            labels.join(", ")
        }
    }
}
