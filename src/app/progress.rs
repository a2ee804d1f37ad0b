use crate::domain::model::Entry;

/// Hooks the runner calls while it works through a batch.
///
/// Every method has an empty default, so `()` is the silent observer.
pub trait RunObserver: Send + Sync {
    /// A batch of `total` sources is about to be processed.
    fn sources_found(&self, _total: usize) {}

    /// Work on the `index`-th source (zero based) starts.
    fn source_started(&self, _index: usize, _source: &Entry) {}

    /// `entry` was written to the store and carries its assigned id.
    fn entry_saved(&self, _entry: &Entry) {}

    /// The batch ended, successfully or not.
    fn finished(&self) {}
}

impl RunObserver for () {}

#[cfg(feature = "cli")]
pub use cli::CliProgress;

#[cfg(feature = "cli")]
mod cli {
    use super::RunObserver;
    use crate::domain::model::Entry;
    use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
    use std::time::Duration;

    /// Terminal progress for the CLI: a bar over the sources of a batch, and
    /// every saved entry printed as soon as the store accepts it.
    pub struct CliProgress {
        bar: ProgressBar,
    }

    impl CliProgress {
        pub fn new() -> Self {
            // 只有批次作業才顯示進度條
            let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
            let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
            Self { bar }
        }
    }

    impl Default for CliProgress {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RunObserver for CliProgress {
        fn sources_found(&self, total: usize) {
            self.bar.set_length(total as u64);
            self.bar.set_draw_target(ProgressDrawTarget::stderr());
            self.bar.enable_steady_tick(Duration::from_millis(120));
        }

        fn source_started(&self, index: usize, source: &Entry) {
            self.bar.set_position(index as u64);
            self.bar.set_message(source.id.clone());
        }

        fn entry_saved(&self, entry: &Entry) {
            self.bar.suspend(|| println!("{}", entry));
        }

        fn finished(&self) {
            self.bar.finish_and_clear();
        }
    }
}
