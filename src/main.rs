mod classifier;
mod client;
mod config;
mod logging;
mod orchestrator;
mod server;
mod service;
mod shutdown;
mod storage;
mod utils;
mod watchdog;
mod wire;

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use client::{validate_alias, ClientLogger, DeliveryClient, DeliveryStatus, MISSING_FILE_ENDPOINT};
use config::{parse_cli_args, AppConfig, CliArgs};
use logging::{LogLevel, Logger, LoggerConfig};
use serde_json::json;
use shutdown::ShutdownHooks;
use storage::{PayloadStore, StorageFacade};
use utils::runtime::ensure_posix_or_exit;
use utils::startup_banner::print_startup_banner;

const SEND_COMMAND: &str = "send";
const MAIN_LOOP_TICK: Duration = Duration::from_millis(100);

fn main() {
    ensure_posix_or_exit();

    let cli = parse_cli_args(std::env::args().skip(1)).unwrap_or_else(|error| {
        eprintln!("argument error: {error}");
        process::exit(2);
    });

    if cli.positional.first().map(String::as_str) == Some(SEND_COMMAND) {
        run_send(cli);
    } else {
        run_server(cli);
    }
}

fn run_server(cli: CliArgs) {
    print_startup_banner();

    let app_config = load_config_or_exit(&cli)
        .with_endpoints(cli.positional.clone())
        .unwrap_or_else(|error| {
            eprintln!("configuration error: {error}");
            process::exit(2);
        });
    let logger = Arc::new(build_logger_or_exit(&app_config));

    let storage = StorageFacade::initialize(&app_config, &logger).unwrap_or_else(|error| {
        eprintln!("storage initialization error: {error}");
        process::exit(2);
    });
    let store: Arc<dyn PayloadStore> = Arc::new(storage);

    let mut service =
        service::start(&app_config, store, Arc::clone(&logger)).unwrap_or_else(|error| {
            eprintln!("service startup error: {error}");
            process::exit(2);
        });
    logger.log(
        LogLevel::Info,
        Some("main::server"),
        &format!(
            "{} v{} accepting deliveries",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": service.local_addr().to_string(),
            "endpoints": app_config.scheduler.endpoints,
            "quantum_ms": app_config.scheduler.quantum_ms,
        })),
    );

    let shutdown_hooks = ShutdownHooks::install().unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    while !shutdown_hooks.is_triggered() {
        thread::sleep(MAIN_LOOP_TICK);
    }

    logger.info(
        Some("main::shutdown"),
        "Shutdown signal received, starting graceful shutdown",
    );
    if let Err(error) = service.shutdown() {
        eprintln!("shutdown error: {error}");
        process::exit(2);
    }
    logger.info(Some("main::shutdown"), "Shutdown completed");
}

fn run_send(cli: CliArgs) {
    let [_, alias, file] = cli.positional.as_slice() else {
        eprintln!("USE: turnstile send <SERVER_ALIAS> <FILE> [--client.port <PORT>]");
        eprintln!("Example: turnstile send s01 file1.txt");
        process::exit(1);
    };

    let app_config = load_config_or_exit(&cli);
    if let Err(error) = validate_alias(alias, &app_config.scheduler.endpoints) {
        eprintln!("ERROR: {error}");
        process::exit(1);
    }

    let client_log = ClientLogger::new(&app_config.client.log_path);
    let record = |status: DeliveryStatus, endpoint: &str| {
        if let Err(error) = client_log.record(status, file, endpoint) {
            eprintln!(
                "cannot append to client log '{}': {error}",
                client_log.path().display()
            );
        }
    };

    let client = DeliveryClient::from_app_config(&app_config);
    match client.deliver_file(alias, Path::new(file)) {
        Ok(delivery) => {
            println!("SERVER RESPONSE from {alias}: {}", delivery.response);
            record(DeliveryStatus::Success, alias);
        }
        Err(error) if error.is_missing_file() => {
            eprintln!("Error opening file: {error}");
            record(DeliveryStatus::Error, MISSING_FILE_ENDPOINT);
            process::exit(1);
        }
        Err(error) => {
            eprintln!("{error}");
            record(DeliveryStatus::Error, alias);
            process::exit(1);
        }
    }
}

fn load_config_or_exit(cli: &CliArgs) -> AppConfig {
    match AppConfig::load_with_discovery(cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}

fn build_logger_or_exit(app_config: &AppConfig) -> Logger {
    match LoggerConfig::from_logging_config(&app_config.logging) {
        Ok(config) => Logger::new(config),
        Err(error) => {
            eprintln!("{error}");
            process::exit(2);
        }
    }
}
