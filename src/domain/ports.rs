use crate::domain::model::{AddResult, Completion, Entry, Message, QueryOperator, QueryValue};
use crate::utils::error::Result;
use async_trait::async_trait;

/// A chat-completion backend.
///
/// Implementations must report an overflowing context as
/// `MettaError::ContextLengthExceeded`; every other failure is passed through
/// to the caller untouched.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        max_response_tokens: u32,
        messages: &[Message],
    ) -> Result<Vec<Completion>>;
}

#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Entry>;
    async fn list(&self) -> Result<Vec<Entry>>;
    async fn query(&self, field: &str, op: QueryOperator, value: &QueryValue) -> Result<Vec<Entry>>;
    async fn add(&self, entry: &Entry) -> Result<AddResult>;
}

pub trait GeneratorSettings: Send + Sync {
    fn model(&self) -> &str;
    fn max_tokens(&self) -> u32;
    fn max_attempts(&self) -> u32;
}
