//! ECS Deployer CLI

use clap::{Arg, ArgAction, Command};
use ecs_deployer::aws;
use std::path::PathBuf;
use tracing::error;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Entrypoint for the ECS Deployer CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("ecs-deployer")
        .version(crate_version())
        .about("Deploy a containerized NGINX service to an ECS cluster backed by an EC2 Auto Scaling Group.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(aws::CREATE_CMD)
                .about("Provision the cluster, capacity, and service from a YAML configuration file.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(aws::UPDATE_CMD)
                .about("Rebuild the container image and roll the service onto a new task definition revision.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(aws::DESTROY_CMD)
                .about("Destroy all resources associated with a given deployment.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .help("Deployment tag (uses persisted metadata)")
                        .value_parser(clap::value_parser!(String)),
                )
                .group(
                    clap::ArgGroup::new("target")
                        .args(["config", "tag"])
                        .required(true),
                ),
        )
        .subcommand(
            Command::new(aws::LIST_CMD)
                .about("List all active deployments (created but not destroyed)."),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((aws::CREATE_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            if let Err(e) = aws::create(config_path).await {
                error!(error=?e, "failed to create deployment");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((aws::UPDATE_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            if let Err(e) = aws::update(config_path).await {
                error!(error=?e, "failed to update deployment");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((aws::DESTROY_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config");
            let tag = matches.get_one::<String>("tag").map(|s| s.as_str());
            if let Err(e) = aws::destroy(config_path, tag).await {
                error!(error=?e, "failed to destroy deployment");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((aws::LIST_CMD, _)) => {
            if let Err(e) = aws::list() {
                error!(error=?e, "failed to list deployments");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
