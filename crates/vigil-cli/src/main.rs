mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Vigil -- oversight control plane for autonomous coding agents.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Cli {
    /// Path to vigil.toml (VIGIL_* environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the WebSocket and HTTP control plane
    Serve {
        /// Override server.listen (e.g. 0.0.0.0:7878)
        #[arg(long)]
        listen: Option<String>,
    },

    /// Audit a project's event hash chain
    Verify {
        #[arg(long)]
        project: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show persisted execution state
    State {
        /// Only this project (default: every project)
        #[arg(long)]
        project: Option<String>,
    },

    /// Show a project's state-transition history
    History {
        #[arg(long)]
        project: String,

        /// Only the most recent N transitions
        #[arg(long)]
        last: Option<usize>,
    },

    /// Export a project's action events as JSON lines
    Events {
        #[arg(long)]
        project: String,

        /// Only events after this ledger position
        #[arg(long, default_value = "0")]
        after: u64,
    },

    /// List recent connection sessions of a project
    Sessions {
        #[arg(long)]
        project: String,

        #[arg(long, default_value = "20")]
        last: usize,
    },

    /// Protection zone management subcommands
    Zones {
        #[command(subcommand)]
        action: ZoneCommands,
    },

    /// Issue a session token for an operator or observer
    Token {
        /// Subject recorded in the token (usually a user name)
        #[arg(long)]
        subject: String,

        /// operator or observer
        #[arg(long, default_value = "observer")]
        role: String,

        /// Restrict the token to one project
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ZoneCommands {
    /// List a project's protection zones
    List {
        #[arg(long)]
        project: String,
    },

    /// Add a protection zone
    Add {
        #[arg(long)]
        project: String,

        /// Glob pattern relative to the project root (e.g. "migrations/**")
        #[arg(long)]
        pattern: String,

        /// DO_NOT_TOUCH, SURGICAL_ONLY, or NONE
        #[arg(long)]
        level: String,

        /// Operation tolerated in a SURGICAL_ONLY zone (repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Remove a user-defined protection zone
    Remove {
        /// Zone id (UUID)
        #[arg(long)]
        id: String,
    },
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level (e.g., RUST_LOG=vigil_control=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { listen } => commands::serve::run(config, listen),
        Commands::Verify { project, json } => commands::ledger::verify(config, &project, json),
        Commands::State { project } => commands::ledger::state(config, project.as_deref()),
        Commands::History { project, last } => commands::ledger::history(config, &project, last),
        Commands::Events { project, after } => commands::ledger::events(config, &project, after),
        Commands::Sessions { project, last } => {
            commands::ledger::sessions(config, &project, last)
        }
        Commands::Zones { action } => match action {
            ZoneCommands::List { project } => commands::zones::list(config, &project),
            ZoneCommands::Add {
                project,
                pattern,
                level,
                allow,
                reason,
            } => commands::zones::add(config, &project, &pattern, &level, &allow, reason),
            ZoneCommands::Remove { id } => commands::zones::remove(config, &id),
        },
        Commands::Token {
            subject,
            role,
            project,
        } => commands::token::issue(config, &subject, &role, project),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["vigil", "serve"]);
        assert!(cli.is_ok(), "should parse serve: {cli:?}");
        let cli = cli.unwrap();
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Serve { listen } => assert!(listen.is_none()),
            _ => panic!("expected Serve command"),
        }
    }

    #[test]
    fn cli_parse_global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vigil",
            "verify",
            "--project",
            "proj",
            "--config",
            "/etc/vigil.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/vigil.toml")));
        match cli.command {
            Commands::Verify { project, json } => {
                assert_eq!(project, "proj");
                assert!(!json);
            }
            _ => panic!("expected Verify command"),
        }
    }

    #[test]
    fn cli_parse_zone_add_with_repeated_allow() {
        let cli = Cli::try_parse_from([
            "vigil",
            "zones",
            "add",
            "--project",
            "proj",
            "--pattern",
            "src/core/**",
            "--level",
            "SURGICAL_ONLY",
            "--allow",
            "FILE_MODIFY",
            "--allow",
            "FILE_CREATE",
        ])
        .unwrap();
        match cli.command {
            Commands::Zones {
                action: ZoneCommands::Add { allow, level, .. },
            } => {
                assert_eq!(level, "SURGICAL_ONLY");
                assert_eq!(allow, vec!["FILE_MODIFY", "FILE_CREATE"]);
            }
            _ => panic!("expected Zones Add command"),
        }
    }

    #[test]
    fn cli_parse_token_defaults_to_observer() {
        let cli = Cli::try_parse_from(["vigil", "token", "--subject", "alice"]).unwrap();
        match cli.command {
            Commands::Token { role, project, .. } => {
                assert_eq!(role, "observer");
                assert!(project.is_none());
            }
            _ => panic!("expected Token command"),
        }
    }

    #[test]
    fn cli_missing_required_args_fails() {
        assert!(Cli::try_parse_from(["vigil", "history"]).is_err());
        assert!(Cli::try_parse_from(["vigil", "zones", "remove"]).is_err());
    }
}
