//! Subcommand implementations.

use std::io::{self, BufRead};

use anyhow::{Context, Result, bail};
use forcelink_relay::{RelayConfig, RelayServer};
use forcelink_session::{ClientConfig, ForceClient, LoginOutcome, Method, Session, channel_surface};
use serde_json::Value;

use crate::store::SessionStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A client with the saved session restored.
struct Connected {
    client: ForceClient,
    restored: Session,
}

async fn connect(config: ClientConfig, store: &SessionStore) -> Result<Connected> {
    let restored = store.require()?;
    let client = ForceClient::new(config).context("failed to create client")?;
    client.restore(restored.clone()).await;
    Ok(Connected { client, restored })
}

/// Log usage and save the session if a refresh changed it.
async fn finish(connected: &Connected, store: &SessionStore) -> Result<()> {
    let usage = connected.client.usage();
    if usage.used.is_some() {
        tracing::info!(used = ?usage.used, limit = ?usage.limit, "api usage");
    }

    let current = connected.client.session().await;
    if current != connected.restored {
        store.save(&current)?;
        tracing::info!("refreshed session saved");
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// `forcelink login`: print the authorize URL, read the redirect URL from
/// stdin, and save the session.
pub async fn login(config: ClientConfig, store: &SessionStore) -> Result<()> {
    login_from(config, store, io::BufReader::new(io::stdin())).await
}

/// [`login`] reading pasted URLs from `input`.
async fn login_from<R>(config: ClientConfig, store: &SessionStore, input: R) -> Result<()>
where
    R: BufRead + Send + 'static,
{
    let callback = config.callback_url.clone();
    let client = ForceClient::new(config).context("failed to create client")?;
    let url = client.authorize_url()?;

    println!("Open this URL in your browser and sign in:");
    println!();
    println!("  {url}");
    println!();
    println!("Then paste the full URL you were redirected to and press Enter.");

    let (navigations, mut surface) = channel_surface();

    // Plain thread so a pending stdin read never holds up runtime shutdown.
    std::thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !line.contains(&callback) {
                eprintln!("That URL does not contain the callback URL {callback}; try again.");
                continue;
            }
            if !navigations.navigate(line) {
                break;
            }
        }
    });

    match client.login(&mut surface).await? {
        LoginOutcome::Authenticated(session) => {
            store.save(&session)?;
            println!(
                "Logged in to {}{}",
                session.instance_url().unwrap_or_default(),
                if session.refresh_token().is_some() {
                    ""
                } else {
                    " (no refresh token issued)"
                }
            );
            println!("Session saved to {}", store.path().display());
            Ok(())
        }
        LoginOutcome::Abandoned => bail!("login abandoned: no redirect URL was received"),
    }
}

/// `forcelink query`.
pub async fn query(config: ClientConfig, store: &SessionStore, soql: &str, all: bool) -> Result<()> {
    let connected = connect(config, store).await?;

    // Save a refreshed session even when the query itself fails.
    let result: Result<Value> = async {
        if all {
            let records = connected.client.query_all(soql).await?;
            Ok(serde_json::json!({ "totalSize": records.len(), "done": true, "records": records }))
        } else {
            Ok(serde_json::to_value(connected.client.query(soql).await?)?)
        }
    }
    .await;

    finish(&connected, store).await?;
    print_json(&result?)
}

/// `forcelink get|post|patch|delete`.
pub async fn call(
    config: ClientConfig,
    store: &SessionStore,
    method: Method,
    path: &str,
    data: Option<&str>,
) -> Result<()> {
    let payload = data
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;

    let connected = connect(config, store).await?;
    let result = connected.client.raw(method, path, payload).await;
    finish(&connected, store).await?;
    print_json(&result?)
}

/// `forcelink refresh`.
pub async fn refresh(config: ClientConfig, store: &SessionStore) -> Result<()> {
    let connected = connect(config, store).await?;
    connected.client.refresh().await?;
    finish(&connected, store).await?;
    println!("Access token refreshed.");
    Ok(())
}

/// `forcelink relay`.
pub async fn relay(mut config: RelayConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let server = RelayServer::new(config).context("invalid relay configuration")?;
    println!("Relay listening on http://{}", server.addr());
    server.start().await.context("relay server failed")?;
    Ok(())
}
