use crate::llm::LanguageModel;
use crate::memory::types::EpisodicMemory;

const RECONSOLIDATE_SYSTEM_PROMPT: &str = "\
You maintain a user's episodic memory. You are given one stored memory and \
newer context from the same conversation. If the new context corrects, \
completes or updates the memory, reply with the rewritten memory as a single \
self-contained paragraph in the memory's original language. If the memory \
is still accurate and nothing should change, reply with an empty message. \
Reply with the memory text only, no preamble.";

/// Outcome of one reconsolidation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconsolidation {
    /// The stored text stands. Covers empty replies, gateway failures and
    /// rewrites identical to the original.
    Kept(EpisodicMemory),
    /// `text` was replaced; the embedding is stale until re-embedded.
    Rewritten(EpisodicMemory),
}

impl Reconsolidation {
    pub fn memory(&self) -> &EpisodicMemory {
        match self {
            Self::Kept(m) | Self::Rewritten(m) => m,
        }
    }

    pub fn into_memory(self) -> EpisodicMemory {
        match self {
            Self::Kept(m) | Self::Rewritten(m) => m,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten(_))
    }
}

fn build_user_prompt(old_text: &str, new_context: &str) -> String {
    format!("Stored memory:\n{old_text}\n\nNew context:\n{new_context}")
}

/// Rewrites an episodic memory in light of newer context.
pub struct Reconsolidator<'a> {
    llm: &'a dyn LanguageModel,
}

impl<'a> Reconsolidator<'a> {
    pub fn new(llm: &'a dyn LanguageModel) -> Self {
        Self { llm }
    }

    /// Never fails: a gateway error or empty reply keeps the original text.
    /// Identity fields (`id`, `user_id`, `chat_id`, `created_at`) are copied
    /// through unchanged.
    pub async fn reconsolidate(&self, old: &EpisodicMemory, new_context: &str) -> Reconsolidation {
        let reply = match self
            .llm
            .chat(RECONSOLIDATE_SYSTEM_PROMPT, &build_user_prompt(&old.text, new_context))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    memory_id = old.id.as_str(),
                    error = %e,
                    "Reconsolidation call failed, keeping original"
                );
                return Reconsolidation::Kept(old.clone());
            }
        };

        let rewritten = reply.trim();
        if rewritten.is_empty() || rewritten == old.text.trim() {
            tracing::debug!(memory_id = old.id.as_str(), "Memory unchanged by reconsolidation");
            return Reconsolidation::Kept(old.clone());
        }

        tracing::debug!(memory_id = old.id.as_str(), "Memory rewritten by reconsolidation");
        Reconsolidation::Rewritten(EpisodicMemory {
            text: rewritten.to_string(),
            ..old.clone()
        })
    }
}
