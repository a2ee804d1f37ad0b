use crate::core::generator::DEFAULT_PROMPT;
use crate::utils::error::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "metta")]
#[command(about = "Seed and grow a question/answer training set stored in Firestore")]
pub struct CliConfig {
    #[arg(long, global = true, help = "Log more verbose")]
    pub verbose: bool,

    #[arg(long, global = true, help = "File to write logs to")]
    pub log_to_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Path to metta.toml (defaults to ./metta.toml, then the environment)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// A field/operator/value filter, e.g. `created_by == gpt-3.5-turbo`.
#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// A field path (.-delimited list of field names) to filter on
    pub field: String,
    /// One of <, <=, ==, >=, > and in
    pub op_string: String,
    /// Value to compare against; comma-separated when the operator is `in`
    pub value: String,
}

#[derive(Debug, Clone, Args)]
pub struct SaveArgs {
    #[arg(long, overrides_with = "no_save", help = "Save the results to the store (default)")]
    pub save: bool,

    #[arg(long, overrides_with = "save", help = "Only print the results")]
    pub no_save: bool,
}

impl SaveArgs {
    pub fn enabled(&self) -> bool {
        !self.no_save
    }
}

#[derive(Debug, Clone, Args)]
pub struct PromptArgs {
    #[arg(long, default_value = DEFAULT_PROMPT, help = "Prompt prefix to use")]
    pub prompt: String,

    #[arg(long, help = "Read the prompt prefix from a file instead")]
    pub prompt_file: Option<PathBuf>,
}

impl PromptArgs {
    pub fn resolve(&self) -> Result<String> {
        match &self.prompt_file {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Ok(self.prompt.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Full entries including ratings
    Entries,
    /// instruction/input/output records for fine-tuning
    Instructions,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Query the store for entries, e.g. `query created_by == gpt-3.5-turbo`
    Query(FilterArgs),

    /// List all entries in the store
    List,

    /// Export all entries to a JSON file
    Export {
        fname: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Entries)]
        format: ExportFormat,
    },

    /// Get the entry with the given id
    Get { id: String },

    /// Generate questions from the context of the entry with the given id
    Generate {
        id: String,
        #[command(flatten)]
        prompt: PromptArgs,
        #[command(flatten)]
        save: SaveArgs,
    },

    /// Generate questions for every entry matching the query
    GenerateQuery {
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        prompt: PromptArgs,
        #[command(flatten)]
        save: SaveArgs,
    },

    /// Load seed tasks from a JSONL file
    Seed {
        file: PathBuf,
        #[command(flatten)]
        save: SaveArgs,
    },
}

impl Command {
    pub fn needs_model(&self) -> bool {
        matches!(self, Command::Generate { .. } | Command::GenerateQuery { .. })
    }
}
