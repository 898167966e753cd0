use clap::Parser;
use tracing_subscriber::EnvFilter;
use scanward::cli::{self, Commands};
use scanward::config::{self, AppConfig, LogFormat};
use scanward::errors::ScanError;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Serve needs its config before logging starts so `logging.*` applies.
    // Until then a scoped subscriber driven by the flags alone reports
    // config warnings.
    let (command, config) = {
        let _bootstrap = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_env_filter(log_filter(&cli, "info"))
                .with_target(false)
                .with_ansi(!cli.no_color)
                .with_writer(std::io::stderr)
                .finish(),
        );
        match &cli.command {
            Commands::Serve(args) => match cli::serve::load_serve_config(args).await {
                Ok(config) => (Command::Serve, config),
                Err(e) => exit_with(e),
            },
            Commands::Validate(args) => (Command::Validate(args.config.clone()), AppConfig::default()),
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cli, &config.logging.level))
        .with_target(false)
        .with_ansi(!cli.no_color);
    if cli.json_logs || config.logging.format == LogFormat::Json {
        builder.json().init();
    } else {
        builder.init();
    }

    let result = match command {
        Command::Serve => cli::serve::handle_serve(config).await,
        Command::Validate(path) => handle_validate(&path).await,
    };

    if let Err(e) = result {
        exit_with(e);
    }
}

fn log_filter(cli: &cli::Cli, configured: &str) -> EnvFilter {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

enum Command {
    Serve,
    Validate(String),
}

fn exit_with(e: ScanError) -> ! {
    eprintln!("Error: {}", e);
    let exit_code = match &e {
        ScanError::Config(_) | ScanError::Yaml(_) => 2,
        ScanError::Persistence(_) => 3,
        ScanError::Io(_) => 4,
        _ => 1,
    };
    std::process::exit(exit_code);
}

async fn handle_validate(path: &str) -> Result<(), ScanError> {
    config::parse_config(std::path::Path::new(path)).await?;
    println!("Configuration is valid: {}", path);
    Ok(())
}
