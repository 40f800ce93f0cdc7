// SPDX-FileCopyrightText: © 2024 Matt Williams <matt.williams@bristol.ac.uk>
// SPDX-License-Identifier: MIT

use std::{
    io::{BufRead as _, Write as _},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mapiam::{
    auth::{Answer, ConversationError, PromptStyle, CONFIG_ARG},
    config::LogSettings,
    logging, AuthFlags, Conversation, HttpIdentityProvider, NameService, NssStatus, Outcome,
    DEFAULT_CONFIG_PATH,
};
use tracing::{debug, info};
// Used by the library.
use config as _;
use reqwest as _;
use serde as _;
use serde_json as _;
use thiserror as _;
use tracing_subscriber as _;
use url as _;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn version() -> &'static str {
    built_info::GIT_VERSION.unwrap_or(built_info::PKG_VERSION)
}

#[derive(Parser)]
#[command(version = version(), about, long_about = None)]
/// Federated identity mapping for SSH logins
struct Args {
    /// the mapping config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look a login name up the way the name service does
    Lookup {
        name: String,
        /// bytes available for the account's strings
        #[arg(long, default_value_t = 1024)]
        buffer_size: usize,
    },
    /// Authenticate a login with an access token read from the terminal
    Authenticate {
        login: String,
        /// deny if no token is entered at all
        #[arg(long)]
        disallow_null_authtok: bool,
    },
    /// Parse the config file and report what it maps
    Check,
}

/// Prompts on stderr and reads the answer from stdin.
struct Terminal;

impl Conversation for Terminal {
    fn prompt(
        &mut self,
        _style: PromptStyle,
        message: &str,
    ) -> Result<Answer, ConversationError> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{message}")
            .and_then(|_| stderr.flush())
            .map_err(|e| ConversationError(e.to_string()))?;
        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ConversationError(e.to_string()))?;
        if read == 0 {
            return Ok(Answer::Missing);
        }
        Ok(Answer::Text(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let settings = LogSettings::read(&args.config);
    let log = logging::init(settings.log_format, settings.verbosity());
    debug!("Starting mapiam {}", version());

    match args.command {
        Command::Lookup { name, buffer_size } => {
            let mut nss = NameService::new(&args.config);
            let status = nss.getpwnam(&name, buffer_size);
            if let Some(directory) = nss.directory() {
                log.apply(directory.verbosity);
            }
            Ok(match status {
                NssStatus::Success(account) => {
                    println!("{}", account.to_passwd_line());
                    ExitCode::SUCCESS
                }
                NssStatus::NotFound => {
                    println!("notfound");
                    ExitCode::from(2)
                }
                NssStatus::Unavailable => {
                    println!("unavail");
                    ExitCode::from(3)
                }
            })
        }
        Command::Authenticate {
            login,
            disallow_null_authtok,
        } => {
            let provider =
                HttpIdentityProvider::new().context("Could not build the HTTP client.")?;
            let module_args = [format!("{CONFIG_ARG}{}", args.config.display())];
            let outcome = mapiam::authenticate(
                &module_args,
                Some(login.as_str()),
                AuthFlags {
                    disallow_null_authtok,
                },
                &mut Terminal,
                &provider,
            )
            .await;
            Ok(match outcome {
                Outcome::Accept => {
                    println!("accepted");
                    ExitCode::SUCCESS
                }
                Outcome::Deny(_) => {
                    println!("denied");
                    ExitCode::FAILURE
                }
            })
        }
        Command::Check => {
            let directory = mapiam::config::parse(&args.config)
                .with_context(|| format!("Could not load {}.", args.config.display()))?;
            log.apply(directory.verbosity);
            info!(groups = directory.store.len(), "Configuration is readable.");
            for group in directory.store.groups() {
                println!("{} {} ({} users)", group.name, group.url, group.mappings.len());
            }
            let mut excluded: Vec<&str> = directory.excluded.iter().collect();
            excluded.sort_unstable();
            println!("excluded: {}", excluded.join(", "));
            let ambiguous = directory.store.ambiguous_names();
            for (name, count) in &ambiguous {
                println!("ambiguous: {name} is mapped {count} times");
            }
            Ok(if ambiguous.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
