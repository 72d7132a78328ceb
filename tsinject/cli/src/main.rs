use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;
use tsinject_headscale::{Client, ClientConfig};

mod config;
mod error;

use config::{Cli, Commands, CreatePreAuthKeyArgs, PreAuthKeyCommand, UserCommand};
use error::{CliError, CliResult};

fn init_tracing_registry() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing_registry();

    let cli = Cli::parse();
    let client = Client::new(&ClientConfig::from_env()).map_err(CliError::from)?;

    match cli.command {
        Commands::Preauthkey(command) => preauthkey_command(&client, command).await?,
        Commands::User(command) => user_command(&client, command).await?,
    }

    Ok(())
}

async fn preauthkey_command(client: &Client, command: PreAuthKeyCommand) -> CliResult<()> {
    match command {
        PreAuthKeyCommand::Create(CreatePreAuthKeyArgs {
            user,
            reusable,
            ephemeral,
            expiration,
            tags,
        }) => {
            let expiration = Utc::now()
                + chrono::Duration::from_std(expiration)
                    .map_err(|_| CliError::ExpirationOutOfRange(format!("{expiration:?}")))?;

            let key = client
                .pre_auth_keys()
                .create(&user, reusable, ephemeral, expiration, tags)
                .await?;

            info!(
                key = %key.key,
                user = %key.user,
                expiration = %key.expiration,
                "created pre-auth key",
            );
        }
        PreAuthKeyCommand::List { user } => {
            for key in client.pre_auth_keys().list(&user).await? {
                info!(
                    key = %key.key,
                    user = %key.user,
                    used = key.used,
                    expiration = %key.expiration,
                    "key found",
                );
            }
        }
        PreAuthKeyCommand::Expire { user, key } => {
            client.pre_auth_keys().expire(&user, &key).await?;
            info!(%key, %user, "expired pre-auth key");
        }
    }

    Ok(())
}

async fn user_command(client: &Client, command: UserCommand) -> CliResult<()> {
    match command {
        UserCommand::Create { name } => {
            let user = client.users().create(&name).await?;
            info!(id = %user.id, name = %user.name, "created user");
        }
        UserCommand::List => {
            for user in client.users().list().await? {
                info!(id = %user.id, name = %user.name, email = %user.email, "user found");
            }
        }
    }

    Ok(())
}
