//! CLI entry point for forcelink.
//!
//! This binary provides the `forcelink` command with subcommands for logging
//! in, calling the REST API with the saved session, and serving the relay.

mod cli;
mod commands;
mod helpers;
mod store;

use anyhow::Result;
use clap::Parser;
use forcelink_session::Method;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, level_for, load_client_config, load_relay_config};
use crate::store::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(level_for(cli.verbose));

    let store = SessionStore::new(&cli.session_file);

    match cli.command {
        Commands::Login => commands::login(load_client_config(&cli.config)?, &store).await,
        Commands::Query { soql, all } => {
            commands::query(load_client_config(&cli.config)?, &store, &soql, all).await
        }
        Commands::Get { path } => {
            commands::call(load_client_config(&cli.config)?, &store, Method::GET, &path, None).await
        }
        Commands::Post { path, data } => {
            commands::call(
                load_client_config(&cli.config)?,
                &store,
                Method::POST,
                &path,
                data.as_deref(),
            )
            .await
        }
        Commands::Patch { path, data } => {
            commands::call(
                load_client_config(&cli.config)?,
                &store,
                Method::PATCH,
                &path,
                data.as_deref(),
            )
            .await
        }
        Commands::Delete { path } => {
            commands::call(load_client_config(&cli.config)?, &store, Method::DELETE, &path, None)
                .await
        }
        Commands::Refresh => commands::refresh(load_client_config(&cli.config)?, &store).await,
        Commands::Relay { bind, port } => {
            commands::relay(load_relay_config(&cli.config)?, bind, port).await
        }
    }
}
