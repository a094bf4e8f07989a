//! Prompt assembly for companion generation.
//!
//! Pure given its inputs: no clock, no store access, no mutation. Section
//! order is fixed so the same inputs always yield the same prompt.

use crate::companion::profile::Companion;
use crate::core::config::PromptConfig;
use crate::memory::ranking::RankedMemory;
use crate::session::turn::{ConversationRole, ConversationTurn};

/// Fixed behavioral guidelines appended to every prompt.
const GUIDELINES: &str = "Stay in character at all times. Reference remembered \
facts when they are relevant. Keep responses concise and conversational.";

/// Inputs to prompt assembly.
#[derive(Clone, Debug)]
pub struct PromptInputs {
    /// The companion being prompted.
    pub companion: Companion,
    /// Retrieved memories, most relevant first.
    pub memories: Vec<RankedMemory>,
    /// Recent conversation window, oldest first.
    pub recent_turns: Vec<ConversationTurn>,
    /// Optional external context, rendered verbatim.
    pub external_context: Option<serde_json::Value>,
    /// The incoming user message.
    pub user_message: String,
}

/// Assembled prompt ready for the generation provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSpec {
    /// Rendered prompt text.
    pub text: String,
}

/// Assemble a prompt, clamping the turn window and enforcing the character
/// budget by dropping the least-relevant memory first, then the oldest turn.
#[must_use]
pub fn assemble(mut inputs: PromptInputs, config: &PromptConfig, window: usize) -> PromptSpec {
    if inputs.recent_turns.len() > window {
        let skip = inputs.recent_turns.len() - window;
        inputs.recent_turns.drain(..skip);
    }

    for hit in &mut inputs.memories {
        let content = &mut hit.record.content;
        if content.chars().count() > config.max_memory_chars {
            let truncated: String = content.chars().take(config.max_memory_chars).collect();
            *content = truncated.trim_end().to_string();
        }
    }

    loop {
        let text = render(&inputs);
        if text.chars().count() <= config.max_chars {
            return PromptSpec { text };
        }

        if inputs.memories.pop().is_some() {
            continue;
        }

        if !inputs.recent_turns.is_empty() {
            inputs.recent_turns.remove(0);
            continue;
        }

        return PromptSpec { text };
    }
}

fn render(inputs: &PromptInputs) -> String {
    let companion = &inputs.companion;
    let mut out = String::new();

    out.push_str("[PERSONA]\n");
    out.push_str(&format!("You are {}. {}\n", companion.name, companion.description));
    out.push_str(&format!(
        "Communication style: {}.\n",
        companion.communication_style
    ));
    if !companion.interests.is_empty() {
        out.push_str(&format!("Interests: {}.\n", companion.interests.join(", ")));
    }
    let traits_line = companion
        .traits
        .named()
        .iter()
        .map(|(name, value)| format!("{name}={value:.2}"))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!("Traits: {traits_line}.\n"));

    out.push_str("\n[MEMORIES]\n");
    for hit in &inputs.memories {
        out.push_str("* ");
        out.push_str(&hit.record.content);
        out.push('\n');
    }

    if let Some(context) = &inputs.external_context {
        out.push_str("\n[CONTEXT]\n");
        out.push_str(&context.to_string());
        out.push('\n');
    }

    out.push_str("\n[CONVERSATION]\n");
    for turn in &inputs.recent_turns {
        let speaker = match turn.role {
            ConversationRole::User => "User",
            ConversationRole::Companion => companion.name.as_str(),
        };
        out.push_str(&format!("{speaker}: {}\n", turn.content));
    }

    out.push_str("\n[GUIDELINES]\n");
    out.push_str(GUIDELINES);
    out.push('\n');

    out.push_str(&format!("\nUser: {}\n{}: ", inputs.user_message, companion.name));
    out
}

/// Render one exchange as the memory content committed after a turn.
#[must_use]
pub fn exchange_record(companion_name: &str, user_message: &str, response: &str) -> String {
    format!("User said: {user_message}\n{companion_name} said: {response}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::traits::PersonalityTraits;
    use crate::core::ids::{CompanionId, MemoryId, OwnerId};
    use crate::memory::record::MemoryRecord;
    use chrono::Utc;

    fn companion() -> Companion {
        let traits = PersonalityTraits::new(0.9, 0.8, 0.4, 0.4).unwrap();
        Companion::new(
            OwnerId::new(),
            "Nova",
            traits,
            vec!["astronomy".to_string()],
            "A stargazer at heart.".to_string(),
        )
    }

    fn ranked(companion_id: CompanionId, content: &str, score: f64) -> RankedMemory {
        RankedMemory {
            score,
            similarity: score,
            importance_score: 1.0,
            recency_score: 1.0,
            record: MemoryRecord {
                id: MemoryId::new(),
                companion_id,
                content: content.to_string(),
                embedding: vec![1.0],
                importance: 1.0,
                category: None,
                metadata: serde_json::Value::Null,
                access_count: 0,
                last_accessed_at: None,
                created_at: Utc::now(),
                expires_at: None,
            },
        }
    }

    fn inputs() -> PromptInputs {
        let companion = companion();
        let memories = vec![
            ranked(companion.id, "User said: hello\nNova said: hi", 0.9),
            ranked(companion.id, "User said: bye\nNova said: later", 0.5),
        ];
        PromptInputs {
            companion,
            memories,
            recent_turns: vec![
                ConversationTurn::user("What's up?"),
                ConversationTurn::companion("The night sky, as always."),
            ],
            external_context: Some(serde_json::json!({"weather": "clear"})),
            user_message: "Tell me about Saturn.".to_string(),
        }
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let config = PromptConfig::default();
        let a = assemble(inputs(), &config, 10);
        let b = assemble(inputs(), &config, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_section_order_is_fixed() {
        let config = PromptConfig::default();
        let spec = assemble(inputs(), &config, 10);
        let persona = spec.text.find("[PERSONA]").unwrap();
        let memories = spec.text.find("[MEMORIES]").unwrap();
        let context = spec.text.find("[CONTEXT]").unwrap();
        let conversation = spec.text.find("[CONVERSATION]").unwrap();
        let guidelines = spec.text.find("[GUIDELINES]").unwrap();
        assert!(persona < memories);
        assert!(memories < context);
        assert!(context < conversation);
        assert!(conversation < guidelines);
    }

    #[test]
    fn test_persona_carries_style_and_traits() {
        let config = PromptConfig::default();
        let spec = assemble(inputs(), &config, 10);
        assert!(spec.text.contains("enthusiastic, warm and supportive"));
        assert!(spec.text.contains("extraversion=0.90"));
        assert!(spec.text.contains("astronomy"));
    }

    #[test]
    fn test_memories_render_most_relevant_first() {
        let config = PromptConfig::default();
        let spec = assemble(inputs(), &config, 10);
        let first = spec.text.find("User said: hello").unwrap();
        let second = spec.text.find("User said: bye").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_window_clamps_turns() {
        let config = PromptConfig::default();
        let mut many = inputs();
        many.recent_turns = (0..20)
            .map(|i| ConversationTurn::user(format!("message {i}")))
            .collect();
        let spec = assemble(many, &config, 10);
        assert!(!spec.text.contains("message 9\n"));
        assert!(spec.text.contains("message 10\n"));
        assert!(spec.text.contains("message 19\n"));
    }

    #[test]
    fn test_budget_drops_least_relevant_memory_first() {
        let config = PromptConfig {
            max_chars: 420,
            max_memory_chars: 1200,
        };
        let spec = assemble(inputs(), &config, 10);
        // The lower-scored memory goes before anything else does.
        assert!(!spec.text.contains("User said: bye"));
    }

    #[test]
    fn test_external_context_rendered_verbatim() {
        let config = PromptConfig::default();
        let spec = assemble(inputs(), &config, 10);
        assert!(spec.text.contains(r#"{"weather":"clear"}"#));
    }

    #[test]
    fn test_exchange_record_format() {
        let record = exchange_record("Nova", "hi", "hello there");
        assert_eq!(record, "User said: hi\nNova said: hello there");
    }
}
