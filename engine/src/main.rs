// Lexis legal research engine
// Main entry point for the lexis binary

use clap::Parser;
use lexis_engine::agent::TurnRequest;
use lexis_engine::cli::{Cli, Command};
use lexis_engine::config::Config;
use lexis_engine::handlers::{
    handle_ask, handle_checklist, handle_classify, handle_history, handle_research, OutputFormat,
};
use lexis_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let loaded = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)
    } else {
        Config::load_or_create()
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::debug!("Lexis v{}", env!("CARGO_PKG_VERSION"));

    let default_mode = config.research.default_mode;

    match cli.command {
        Command::Ask {
            query,
            conversation,
            user,
            mode,
            process,
            ephemeral,
        } => {
            let mut request =
                TurnRequest::new(conversation, user, query).with_mode(mode.unwrap_or(default_mode));
            if let Some(process) = process {
                request = request.with_process(process);
            }
            handle_ask(request, ephemeral, &config, format).await
        }

        Command::Classify { query, mode } => {
            handle_classify(query, mode.unwrap_or(default_mode), &config, format).await
        }

        Command::Research { query, mode } => {
            tracing::info!("Researching: {}", query);
            handle_research(query, mode.unwrap_or(default_mode), &config, format).await
        }

        Command::History {
            conversation,
            user,
            limit,
        } => handle_history(conversation, user, limit, &config, format).await,

        Command::Checklist { message } => handle_checklist(message, &config, format).await,
    }
}
