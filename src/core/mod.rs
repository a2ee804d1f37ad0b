pub mod encoder;
pub mod generator;
pub mod parser;
pub mod retry;

pub use crate::domain::model::{Completion, Entry, FinishReason, Message};
pub use crate::domain::ports::{CompletionService, EntryStore, GeneratorSettings};
pub use crate::utils::error::Result;
