//! CLI argument definitions for forcelink.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// forcelink -- a Force.com REST API client.
#[derive(Parser, Debug)]
#[command(
    name = "forcelink",
    version,
    about = "forcelink -- Force.com REST API client",
    long_about = "Log in with the OAuth implicit grant, run queries and raw REST calls with \
                  automatic session refresh, or serve a same-origin relay for browser apps."
)]
pub struct Cli {
    /// Client configuration file (TOML). FORCELINK_* variables override it.
    #[arg(long, short, global = true, default_value = "forcelink.toml")]
    pub config: PathBuf,

    /// Where the session is saved between runs.
    #[arg(long, global = true, default_value = ".forcelink-session.json")]
    pub session_file: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in through the browser and save the session.
    ///
    /// Open the printed URL, sign in, then paste the URL the browser was
    /// redirected to.
    Login,

    /// Run a SOQL query.
    Query {
        /// The SOQL statement.
        soql: String,

        /// Follow nextRecordsUrl and print every record.
        #[arg(long)]
        all: bool,
    },

    /// GET a path relative to /services/data/.
    Get {
        path: String,
    },

    /// POST JSON to a path relative to /services/data/.
    Post {
        path: String,

        /// JSON request body.
        #[arg(long, short)]
        data: Option<String>,
    },

    /// PATCH JSON to a path relative to /services/data/.
    Patch {
        path: String,

        /// JSON request body.
        #[arg(long, short)]
        data: Option<String>,
    },

    /// DELETE a path relative to /services/data/.
    Delete {
        path: String,
    },

    /// Exchange the saved refresh token for a new access token.
    Refresh,

    /// Serve the same-origin relay.
    Relay {
        /// Address to bind the relay to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_all() {
        let cli = Cli::try_parse_from(["forcelink", "query", "SELECT Id FROM Account", "--all"]).unwrap();
        match cli.command {
            Commands::Query { soql, all } => {
                assert_eq!(soql, "SELECT Id FROM Account");
                assert!(all);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("forcelink.toml"));
    }

    #[test]
    fn parse_post_with_data() {
        let cli = Cli::try_parse_from([
            "forcelink",
            "post",
            "v35.0/sobjects/Account",
            "--data",
            r#"{"Name":"Acme"}"#,
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Post { ref path, data: Some(_) } if path == "v35.0/sobjects/Account"
        ));
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "forcelink",
            "refresh",
            "--session-file",
            "/tmp/s.json",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.session_file, PathBuf::from("/tmp/s.json"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn relay_overrides() {
        let cli = Cli::try_parse_from(["forcelink", "relay", "--port", "9100"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Relay {
                bind: None,
                port: Some(9100)
            }
        ));
    }
}
