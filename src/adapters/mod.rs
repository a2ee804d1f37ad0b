// Adapters layer: concrete implementations of the domain ports.

pub mod firestore;
pub mod openai;

pub use firestore::{FirestoreStore, FirestoreTarget};
pub use openai::OpenAiClient;
