use crate::app::progress::RunObserver;
use crate::core::generator::QaGenerator;
use crate::core::{CompletionService, EntryStore};
use crate::domain::model::{Entry, QueryOperator, QueryValue, SeedTask};
use crate::utils::error::{MettaError, Result};
use crate::utils::validation;
use std::path::Path;

/// Wires generator output into the entry store for the CLI commands.
///
/// Saved entries are reported to the observer one by one, so a run that
/// fails halfway still tells the caller which documents it created.
pub struct QaRunner<S: EntryStore> {
    store: S,
    observer: Box<dyn RunObserver>,
}

impl<S: EntryStore> QaRunner<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            observer: Box::new(()),
        }
    }

    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn query(&self, field: &str, op_string: &str, value: &str) -> Result<Vec<Entry>> {
        let op: QueryOperator = op_string.parse()?;
        let value = QueryValue::parse(value, op);
        tracing::debug!("Querying {} {:?} {:?}", field, op, value);
        self.store.query(field, op, &value).await
    }

    pub async fn list(&self) -> Result<Vec<Entry>> {
        self.store.list().await
    }

    pub async fn get(&self, id: &str) -> Result<Entry> {
        self.store.get(id).await
    }

    /// Writes every entry as a pretty JSON array. Returns how many were written.
    pub async fn export(&self, path: &Path, instructions: bool) -> Result<usize> {
        validation::validate_path("fname", &path.to_string_lossy())?;

        let entries = self.store.list().await?;
        let json = if instructions {
            let records: Vec<_> = entries.iter().map(Entry::to_instruction).collect();
            serde_json::to_string_pretty(&records)?
        } else {
            serde_json::to_string_pretty(&entries)?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        tracing::info!("Exported {} entries to {}", entries.len(), path.display());
        Ok(entries.len())
    }

    async fn save(&self, entry: &mut Entry) -> Result<()> {
        let (created, reference) = self.store.add(entry).await?;
        tracing::debug!("Added document {} at {}", reference.path, created);
        entry.id = reference.id;
        self.observer.entry_saved(entry);
        Ok(())
    }

    /// Generates entries from `source.context`, linking each back to `source`.
    pub async fn generate_from<C: CompletionService>(
        &self,
        generator: &QaGenerator<C>,
        source: &Entry,
        save: bool,
    ) -> Result<Vec<Entry>> {
        let mut generated = generator.generate_questions(&source.context).await?;
        tracing::info!("Generated {} entries from {}", generated.len(), source.id);

        for entry in &mut generated {
            entry.generated_by = Some(source.id.clone());
            entry.context = source.context.clone();
            if save {
                self.save(entry).await?;
            }
        }
        Ok(generated)
    }

    pub async fn generate<C: CompletionService>(
        &self,
        generator: &QaGenerator<C>,
        id: &str,
        save: bool,
    ) -> Result<Vec<Entry>> {
        let source = self.store.get(id).await?;
        self.generate_from(generator, &source, save).await
    }

    /// Generates from every matching entry. Sources whose context is empty or
    /// too long for the model are skipped; any other failure stops the run.
    pub async fn generate_query<C: CompletionService>(
        &self,
        generator: &QaGenerator<C>,
        field: &str,
        op_string: &str,
        value: &str,
        save: bool,
    ) -> Result<Vec<Entry>> {
        let sources = self.query(field, op_string, value).await?;
        self.observer.sources_found(sources.len());
        let result = self.generate_each(generator, &sources, save).await;
        self.observer.finished();
        result
    }

    async fn generate_each<C: CompletionService>(
        &self,
        generator: &QaGenerator<C>,
        sources: &[Entry],
        save: bool,
    ) -> Result<Vec<Entry>> {
        let total = sources.len();
        let mut generated = Vec::new();

        for (index, source) in sources.iter().enumerate() {
            self.observer.source_started(index, source);
            tracing::info!("[{}/{}] Generating from {}", index + 1, total, source.id);
            if source.context.trim().is_empty() {
                tracing::warn!("Skipping {}: no context", source.id);
                continue;
            }
            match self.generate_from(generator, source, save).await {
                Ok(entries) => generated.extend(entries),
                Err(e @ (MettaError::RetriesExhausted { .. } | MettaError::PromptTooLong { .. })) => {
                    tracing::warn!("Skipping {}: {}", source.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(generated)
    }

    /// Loads seed tasks from a JSONL file, one task per line.
    pub async fn seed(&self, path: &Path, save: bool) -> Result<Vec<Entry>> {
        validation::validate_file_extension("file", &path.to_string_lossy(), &["jsonl"])?;
        let content = std::fs::read_to_string(path)?;
        let mut seeded = Vec::new();

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let task: SeedTask = serde_json::from_str(line)?;
            let Some(mut entry) = task.into_entry() else {
                tracing::warn!("Skipping line {}: no usable instance", number + 1);
                continue;
            };
            if save {
                self.save(&mut entry).await?;
                tracing::info!("Added document with id {}", entry.id);
            }
            seeded.push(entry);
        }

        Ok(seeded)
    }
}
