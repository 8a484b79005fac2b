use clap::Parser;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use grounded_analysis::{
    cache::open_cache,
    config::{Config, LogFormat},
    langbase::{LangbaseClient, LangbaseModel},
    pipeline::{AnalysisOrchestrator, PipelineSettings, ProgressEvent},
    search::{DocumentIndexClient, WebSearchClient},
};

/// Run one grounded analysis and print the result.
#[derive(Debug, Parser)]
#[command(name = "grounded-analysis", version, about)]
struct Cli {
    /// The analysis request
    input: String,

    /// Highlighted excerpt to analyze alongside the request
    #[arg(long)]
    excerpt: Option<String>,

    /// Print the whole result, references included, as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Grounded analysis starting..."
    );

    let cache = open_cache(&config.cache).await;

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    if let Err(e) = langbase.ensure_analysis_pipe(&config.pipes.analysis).await {
        error!(error = %e, "Failed to ensure analysis pipe exists");
        return Err(e.into());
    }

    let internal = DocumentIndexClient::new(&config.search.internal, &config.request)?;
    let external = WebSearchClient::new(&config.search.external, &config.request)?;

    let orchestrator = AnalysisOrchestrator::new(
        Arc::new(LangbaseModel::new(langbase, &config.pipes.analysis)),
        Arc::new(internal),
        Arc::new(external),
        cache,
        PipelineSettings::from_config(&config),
    );

    let observer = |event: &ProgressEvent| {
        info!(
            run_id = %event.run_id,
            state = %event.state,
            percent = event.percent,
            "{}",
            event.message
        );
    };

    let result = match orchestrator
        .run(&cli.input, cli.excerpt.as_deref(), &observer)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Analysis failed");
            return Err(e.into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.content);
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
