use crate::core::encoder::{budget, PromptEncoder, TokenBudgeter};
use crate::core::parser::parse_multiple;
use crate::core::retry::{ask_with_retry, DEFAULT_MAX_ATTEMPTS};
use crate::domain::model::Entry;
use crate::domain::ports::{CompletionService, GeneratorSettings};
use crate::utils::error::{MettaError, Result};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 4097;
pub const DEFAULT_PROMPT: &str = "Generate 20 numbered questions and answers";

/// Turns source text into Q&A entries through a completion service.
///
/// Holds nothing between calls besides its configuration, so independent
/// generators can run side by side.
pub struct QaGenerator<C: CompletionService> {
    service: C,
    model: String,
    max_tokens: u32,
    max_attempts: u32,
    encoder: PromptEncoder,
    budgeter: TokenBudgeter,
}

impl<C: CompletionService> QaGenerator<C> {
    pub fn new(service: C, prompt: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            service,
            encoder: PromptEncoder::new(prompt)?,
            budgeter: TokenBudgeter::for_model(&model)?,
            model,
            max_tokens,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn from_settings<S: GeneratorSettings>(service: C, prompt: impl Into<String>, settings: &S) -> Result<Self> {
        Ok(Self::new(service, prompt, settings.model(), settings.max_tokens())?
            .with_max_attempts(settings.max_attempts()))
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_questions(&self, source_text: &str) -> Result<Vec<Entry>> {
        if source_text.trim().is_empty() {
            return Err(MettaError::ConfigError {
                message: "no source text provided".to_string(),
            });
        }

        let messages = vec![self.encoder.encode(source_text)];
        tracing::info!("Using {:?} as messages", messages);

        let prompt_tokens = self.budgeter.estimate_tokens(&messages);
        let remaining = budget(self.max_tokens, prompt_tokens);
        tracing::debug!(
            "The question requires {} tokens, +/- {} left for Q&A generation",
            prompt_tokens,
            remaining
        );
        if remaining < 1 {
            return Err(MettaError::PromptTooLong {
                prompt_tokens,
                limit: self.max_tokens,
            });
        }

        let completions = ask_with_retry(
            &self.service,
            &self.model,
            remaining as u32,
            &messages,
            self.max_attempts,
        )
        .await?;
        tracing::info!("{} returned {} completion(s)", self.model, completions.len());

        Ok(parse_multiple(&completions, &self.model))
    }
}
