use std::{env, process, str::FromStr as _};

use clap::Parser as _;
use config_rs::Config as ConfigRs;
use tracing::{debug, trace};

use crate::{
    cli::{Cli, Commands},
    commands::{health, migrate, optimize, queue, self_test, serve, validate, version},
    config::{Config, ConfigurationError},
    environment::Environment,
    setup_tracing::setup_tracing_for_command,
};

const ENVIRONMENT_VARIABLE: &str = "APP_ENVIRONMENT";

pub async fn boot() {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        version::print_version_info();
        return;
    }

    let environment = set_environment();

    let config = match read_config(environment) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            process::exit(1);
        }
    };

    // Set up tracing with appropriate level based on command
    setup_tracing_for_command(&cli.command, &config.tracing.log_level);

    debug!("Environment set to: {:?}", environment);
    trace!("Configuration loaded: {:?}", config);

    handle_command(environment, config, cli).await;
}

#[must_use]
pub fn set_environment() -> Environment {
    env::var(ENVIRONMENT_VARIABLE)
        .ok()
        .and_then(|s| Environment::from_str(&s).ok())
        .unwrap_or_default()
}

/// Read `config/{environment}.toml` overlaid with `APP_` environment
/// variables (`APP_DATABASE__HOST`), then validate it.
pub fn read_config(environment: Environment) -> Result<Config, ConfigurationError> {
    let config_file_name = format!("config/{environment}");

    trace!("Reading configuration from: {}", config_file_name);

    let config: Config = ConfigRs::builder()
        .add_source(config_rs::File::with_name(&config_file_name).required(false))
        .add_source(
            config_rs::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()?;

    config.check()?;
    Ok(config)
}

pub async fn handle_command(environment: Environment, config: Config, cli: Cli) {
    match cli.command {
        Some(Commands::Validate {
            rules,
            sequential,
            concurrency,
            no_cache,
            format,
        }) => {
            validate::handle_validate_command(
                environment,
                config,
                validate::ValidateOptions {
                    rules,
                    sequential,
                    concurrency,
                    use_cache: !no_cache,
                    format,
                },
            )
            .await;
        }
        Some(Commands::Health) => {
            health::handle_health_command(&config).await;
        }
        Some(Commands::Optimize) => {
            optimize::handle_optimize_command(&config).await;
        }
        Some(Commands::SelfTest) => {
            self_test::handle_self_test_command(&config).await;
        }
        Some(Commands::Migrate { action }) => {
            migrate::handle_migrate_command(environment, config, action).await;
        }
        Some(Commands::Queue { action }) => {
            queue::handle_queue_command(environment, config, action).await;
        }
        Some(Commands::Version) => {
            version::print_version_info();
        }
        Some(Commands::Serve) | None => {
            serve::handle_serve_command(environment, config).await;
        }
    }
}
