use clap::Parser;
use colored::*;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};
use std::io::Write;

use pipit::color_utils;
use pipit::config::{
    FetchCommand, FetchConfig, GlobalArgs, TrainCommand, TrainConfig, VisualizeCommand,
    VisualizeConfig,
};
use pipit::fetch::run_fetch;
use pipit::train::run_training;
use pipit::visualize::run_visualize;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Fetch a serialized model from the object store
    Fetch(FetchCommand),

    /// Draw a detection box and confidence label on an image
    Visualize(VisualizeCommand),

    /// Fine-tune the bird classifier on a labeled dataset
    Train(TrainCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "pipit")]
#[command(about = "Bird classifier toolkit")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    let base_level = verbosity.log_level_filter();
    let adjusted_level = match base_level {
        log::LevelFilter::Off => log::LevelFilter::Off, // -qq -> OFF
        log::LevelFilter::Error => log::LevelFilter::Warn, // default -> WARN
        log::LevelFilter::Warn => log::LevelFilter::Info, // -v -> INFO
        log::LevelFilter::Info => log::LevelFilter::Debug, // -vv -> DEBUG
        log::LevelFilter::Debug => log::LevelFilter::Trace, // -vvv -> TRACE
        log::LevelFilter::Trace => log::LevelFilter::Trace, // -vvvv -> TRACE (max)
    };

    // clap-verbosity-flag doesn't distinguish default from -q, so check the
    // quiet flag directly
    if verbosity.is_silent() {
        log::LevelFilter::Error // -q -> ERROR
    } else {
        adjusted_level
    }
}

fn main() {
    let cli = Cli::parse();

    color_utils::init_color_config(cli.global.no_color);

    // If user didn't pass -v/-q and RUST_LOG is set, honor the env var.
    let use_env = !cli.global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let level_filter = get_log_level_from_verbosity(cli.global.verbosity.clone());

        let mut b = Builder::new();
        b.filter_level(level_filter);
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => "ERROR".red().bold().to_string(),
                Level::Warn => "WARN".yellow().to_string(),
                Level::Info => "INFO".green().to_string(),
                Level::Debug => "DEBUG".blue().to_string(),
                Level::Trace => "TRACE".magenta().to_string(),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();

    match &cli.command {
        Some(Commands::Fetch(fetch_cmd)) => {
            info!(
                "Fetch: {}/{} -> {}",
                fetch_cmd.bucket, fetch_cmd.key, fetch_cmd.dest
            );

            let config = FetchConfig::from_args(cli.global.clone(), fetch_cmd.clone());
            if let Err(e) = run_fetch(config) {
                error!("Fetch failed: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Commands::Visualize(viz_cmd)) => {
            info!(
                "Visualize: {} | box: {:?} | conf: {}",
                viz_cmd.image, viz_cmd.bbox, viz_cmd.confidence
            );

            let config = VisualizeConfig::from_args(cli.global.clone(), viz_cmd.clone());
            if let Err(e) = run_visualize(config) {
                error!("Visualization failed: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Commands::Train(train_cmd)) => {
            info!(
                "Train: {} | {} classes | {} epochs | batch {}",
                train_cmd.dataset_root, train_cmd.num_classes, train_cmd.epochs,
                train_cmd.batch_size
            );

            let config = match TrainConfig::from_args(cli.global.clone(), train_cmd.clone()) {
                Ok(config) => config,
                Err(e) => {
                    error!("Invalid training arguments: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = run_training(config) {
                error!("Training failed: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Commands::Version) => {
            println!("pipit v{}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            // Show help if no command specified
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().unwrap();
        }
    }
}
