use clap::Parser;
use metta_qa::app::progress::CliProgress;
use metta_qa::config::cli::{Command, ExportFormat};
use metta_qa::utils::error::ErrorSeverity;
use metta_qa::utils::{logger, validation::Validate};
use metta_qa::{AppConfig, CliConfig, Entry, MettaError, QaGenerator, QaRunner};

fn print_entries(entries: &[Entry]) {
    for entry in entries {
        println!("{}", entry);
    }
}

/// Saved entries were already printed by the progress observer as they landed.
fn print_unsaved(entries: &[Entry], saved: bool) {
    if !saved {
        print_entries(entries);
    }
}

async fn run(config: CliConfig) -> Result<(), MettaError> {
    let app_config = AppConfig::load(config.config.as_deref())?;
    app_config.validate()?;

    let client = reqwest::Client::new();
    let runner = QaRunner::new(app_config.firestore_store(client)).with_observer(CliProgress::new());

    // 只有產生問答的指令才需要 OpenAI
    let generator = if config.command.needs_model() {
        Some(app_config.openai_client()?)
    } else {
        None
    };

    match config.command {
        Command::Query(filter) => {
            print_entries(&runner.query(&filter.field, &filter.op_string, &filter.value).await?);
        }
        Command::List => print_entries(&runner.list().await?),
        Command::Export { fname, format } => {
            let count = runner
                .export(&fname, format == ExportFormat::Instructions)
                .await?;
            println!("📁 Exported {} entries to {}", count, fname.display());
        }
        Command::Get { id } => println!("{}", runner.get(&id).await?),
        Command::Generate { id, prompt, save } => {
            let service = generator.ok_or_else(|| MettaError::MissingConfigError {
                field: "openai".to_string(),
            })?;
            let generator = QaGenerator::from_settings(service, prompt.resolve()?, &app_config.openai)?;
            print_unsaved(&runner.generate(&generator, &id, save.enabled()).await?, save.enabled());
        }
        Command::GenerateQuery {
            filter,
            prompt,
            save,
        } => {
            let service = generator.ok_or_else(|| MettaError::MissingConfigError {
                field: "openai".to_string(),
            })?;
            let generator = QaGenerator::from_settings(service, prompt.resolve()?, &app_config.openai)?;
            let entries = runner
                .generate_query(
                    &generator,
                    &filter.field,
                    &filter.op_string,
                    &filter.value,
                    save.enabled(),
                )
                .await?;
            print_unsaved(&entries, save.enabled());
        }
        Command::Seed { file, save } => {
            print_unsaved(&runner.seed(&file, save.enabled()).await?, save.enabled());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose, config.log_to_file.as_deref())?;
    }

    tracing::info!("Starting metta");
    tracing::debug!("CLI config: {:?}", config);

    if let Err(e) = run(config).await {
        // 記錄詳細錯誤信息
        tracing::error!(
            "❌ metta failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };

        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
