#![deny(missing_docs)]

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Exercise the headscale API the sidecar injector talks to.
///
/// Connection settings come from the environment: `HEADSCALE_CLI_ADDRESS`
/// and `HEADSCALE_CLI_API_KEY`.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub(super) struct Cli {
    /// The command to run.
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(Debug, Subcommand)]
pub(super) enum Commands {
    /// Manage pre-authentication keys.
    #[command(subcommand)]
    Preauthkey(PreAuthKeyCommand),

    /// Manage headscale users.
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Debug, Subcommand)]
pub(super) enum PreAuthKeyCommand {
    /// Issue a new pre-auth key.
    Create(CreatePreAuthKeyArgs),

    /// List the keys visible for a user.
    List {
        /// User whose keys to list.
        #[arg(long)]
        user: String,
    },

    /// Mark a key inactive.
    Expire {
        /// User the key is scoped to.
        #[arg(long)]
        user: String,

        /// The key to expire.
        #[arg(long)]
        key: String,
    },
}

#[derive(Debug, Args)]
pub(super) struct CreatePreAuthKeyArgs {
    /// User to scope the key to.
    #[arg(long)]
    pub(super) user: String,

    /// Allow the key to be used more than once.
    #[arg(long)]
    pub(super) reusable: bool,

    /// Remove nodes joined with this key once they go offline.
    #[arg(long)]
    pub(super) ephemeral: bool,

    /// How long the key stays valid, e.g. `30s` or `2m`.
    #[arg(long, default_value = "2m", value_parser = humantime::parse_duration)]
    pub(super) expiration: Duration,

    /// ACL tag to attach, e.g. `tag:pod`. Repeatable.
    #[arg(long = "tag")]
    pub(super) tags: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub(super) enum UserCommand {
    /// Create a user.
    Create {
        /// Name of the new user.
        #[arg(long)]
        name: String,
    },

    /// List users.
    List,
}
