pub mod progress;
pub mod runner;

pub use progress::RunObserver;
pub use runner::QaRunner;
