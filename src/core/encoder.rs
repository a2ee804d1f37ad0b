use crate::domain::model::Message;
use crate::utils::error::{MettaError, Result};
use tiktoken_rs::CoreBPE;

/// Every message is framed as `<im_start>{role/name}\n{content}<im_end>\n`.
const TOKENS_PER_MESSAGE: i64 = 4;
/// A name replaces the role, which is always a single token.
const TOKENS_PER_NAME: i64 = -1;
/// Every reply is primed with `<im_start>assistant`.
const REPLY_PRIMING_TOKENS: i64 = 2;

const FALLBACK_ENCODING: &str = "cl100k_base";

/// Builds the single user message sent to the model.
#[derive(Debug, Clone)]
pub struct PromptEncoder {
    template: String,
}

impl PromptEncoder {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(MettaError::ConfigError {
                message: "prompt template is empty".to_string(),
            });
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn encode(&self, source_text: &str) -> Message {
        Message::user(format!("{}\n{}", self.template, source_text))
    }
}

/// Approximate token accounting for chat messages.
///
/// The framing constants mirror the chat markup used by the gpt-3.5/gpt-4
/// family. Other models frame messages differently, so the estimate can be off
/// by a few tokens either way; `budget` keeps a margin for that.
pub struct TokenBudgeter {
    bpe: CoreBPE,
}

impl TokenBudgeter {
    /// Loads the tokenizer for `model`, falling back to `cl100k_base`.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                tracing::debug!(
                    "No tokenizer registered for {}, using {}",
                    model,
                    FALLBACK_ENCODING
                );
                tiktoken_rs::cl100k_base().map_err(|e| MettaError::TokenizerError {
                    message: e.to_string(),
                })?
            }
        };
        Ok(Self { bpe })
    }

    fn count(&self, text: &str) -> i64 {
        self.bpe.encode_with_special_tokens(text).len() as i64
    }

    pub fn estimate_tokens(&self, messages: &[Message]) -> u32 {
        let mut total = REPLY_PRIMING_TOKENS;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            total += self.count(message.role.as_str());
            total += self.count(&message.content);
            if let Some(name) = &message.name {
                total += self.count(name);
                total += TOKENS_PER_NAME;
            }
        }
        total.max(0) as u32
    }
}

/// Tokens left for the reply after the prompt, with a 5% safety margin on the
/// prompt estimate. Negative when the prompt alone does not fit.
pub fn budget(total_token_limit: u32, estimated_prompt_tokens: u32) -> i64 {
    // ceil(1.05 * n) in integer arithmetic
    let padded = (estimated_prompt_tokens as i64 * 105 + 99) / 100;
    total_token_limit as i64 - padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Role;

    #[test]
    fn test_encode_prepends_template() {
        let encoder = PromptEncoder::new("Generate 20 numbered questions and answers").unwrap();
        let message = encoder.encode("Paris is the capital of France.");
        assert_eq!(message.role, Role::User);
        assert_eq!(
            message.content,
            "Generate 20 numbered questions and answers\nParis is the capital of France."
        );
        assert_eq!(message.name, None);
    }

    #[test]
    fn test_empty_template_is_config_error() {
        assert!(matches!(
            PromptEncoder::new(""),
            Err(MettaError::ConfigError { .. })
        ));
        assert!(PromptEncoder::new("   \n").is_err());
    }

    #[test]
    fn test_budget() {
        assert_eq!(budget(4097, 100), 3992);
        assert_eq!(budget(4097, 0), 4097);
        // 1.05 * 10 = 10.5 rounds up
        assert_eq!(budget(100, 10), 89);
        assert!(budget(100, 200) < 0);
    }

    #[test]
    fn test_estimate_counts_framing() {
        let budgeter = TokenBudgeter::for_model("gpt-3.5-turbo").unwrap();
        let empty: Vec<Message> = vec![];
        assert_eq!(budgeter.estimate_tokens(&empty), 2);

        let message = Message::user("hello");
        let single = budgeter.estimate_tokens(std::slice::from_ref(&message));
        // framing + role + content + priming
        let expected = 4 + budgeter.count("user") + budgeter.count("hello") + 2;
        assert_eq!(single as i64, expected);
    }

    #[test]
    fn test_name_replaces_role_token() {
        let budgeter = TokenBudgeter::for_model("gpt-3.5-turbo").unwrap();
        let plain = Message::user("hello");
        let named = Message {
            name: Some("alice".to_string()),
            ..plain.clone()
        };
        let diff = budgeter.estimate_tokens(&[named]) as i64 - budgeter.estimate_tokens(&[plain]) as i64;
        assert_eq!(diff, budgeter.count("alice") - 1);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let budgeter = TokenBudgeter::for_model("some-local-model").unwrap();
        assert!(budgeter.estimate_tokens(&[Message::user("hello world")]) > 2);
    }
}
