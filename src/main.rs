mod backtest;
mod config;
mod env;
mod errors;
mod models;
mod policy;
mod storage;

use backtest::BacktestEngine;
use clap::Parser;
use config::Config;
use errors::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "Policy Backtester")]
#[command(version = "0.1.0")]
#[command(about = "Evaluate a trained trading policy against historical market data", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Checkpoint directory (overrides config)
    #[arg(short = 'm', long)]
    checkpoint: Option<String>,

    /// Symbol to backtest (overrides config)
    #[arg(short, long)]
    symbol: Option<String>,

    /// Force the CNN architecture
    #[arg(long)]
    use_cnn: bool,

    /// Force the LSTM architecture
    #[arg(long)]
    use_lstm: bool,

    /// Force the state-space architecture
    #[arg(long)]
    use_state_space: bool,

    /// Force the transformer architecture
    #[arg(long)]
    use_transformer: bool,

    /// Persist the full per-step trace alongside the summary
    #[arg(long)]
    save_trace: bool,

    /// Continue when persisting results fails
    #[arg(long)]
    skip_on_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load_from_file(&args.config)?;

    // Apply CLI overrides
    if let Some(checkpoint) = args.checkpoint {
        config.model.checkpoint_path = checkpoint;
    }
    if let Some(symbol) = args.symbol {
        config.general.symbol = symbol;
    }
    config.model.use_cnn |= args.use_cnn;
    config.model.use_lstm |= args.use_lstm;
    config.model.use_state_space |= args.use_state_space;
    config.model.use_transformer |= args.use_transformer;
    config.output.save_trace |= args.save_trace;
    config.output.skip_on_error |= args.skip_on_error;

    // Initialize logging
    init_logging(&config.logging.level)?;

    info!("Starting Policy Backtester v0.1.0");
    info!(
        "Symbol: {}, checkpoint: {}, data type: {}",
        config.general.symbol, config.model.checkpoint_path, config.general.data_type
    );

    let engine = BacktestEngine::new(config);
    let bundle = engine.run().await?;

    println!("{}", bundle.format_report());

    Ok(())
}

/// Initialize logging based on configuration
fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| errors::BacktestError::ConfigError(format!("Failed to set logger: {}", e)))?;

    Ok(())
}
