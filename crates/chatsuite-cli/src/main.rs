//! chatsuite CLI - operator tooling for the ChatSuite backend

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chatsuite_core::{Config, Database};
use clap::{Parser, Subcommand};

mod pretty;

#[derive(Debug, Parser)]
#[command(
    name = "chatsuite",
    author,
    version,
    about = "Operator CLI for ChatSuite",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "CHATSUITE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Inspect and grant credits
    Credits {
        #[command(subcommand)]
        command: CreditsCommand,
    },

    /// Inspect chats
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Create a user and print its API token
    Add {
        /// Contact email
        #[arg(long)]
        email: Option<String>,

        /// Starting credits (defaults to chat.signup_credits)
        #[arg(long)]
        credits: Option<i64>,
    },

    /// List users
    List,
}

#[derive(Debug, Subcommand)]
enum CreditsCommand {
    /// Show a user's balance
    Show {
        /// User ID
        user: String,
    },

    /// Add credits to a user's balance
    Grant {
        /// User ID
        user: String,

        /// Credits to add
        amount: i64,
    },
}

#[derive(Debug, Subcommand)]
enum ChatsCommand {
    /// List a user's chats, newest first
    List {
        /// User ID
        #[arg(long)]
        user: String,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show a chat transcript
    Show {
        /// Chat ID
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(Config::default_config_path);

    match cli.command {
        Command::Config { command } => cmd_config(&config_path, command),
        Command::User { command } => {
            let (config, db) = open(&config_path).await?;
            cmd_user(&db, &config, command, cli.json).await
        }
        Command::Credits { command } => {
            let (_, db) = open(&config_path).await?;
            cmd_credits(&db, command, cli.json).await
        }
        Command::Chats { command } => {
            let (_, db) = open(&config_path).await?;
            cmd_chats(&db, command, cli.json).await
        }
    }
}

async fn open(config_path: &Path) -> Result<(Config, Database)> {
    let mut config = Config::ensure_at(config_path)?;
    config.apply_env_overrides();
    let db = Database::open(&config.database).await?;
    Ok((config, db))
}

async fn cmd_user(db: &Database, config: &Config, command: UserCommand, json: bool) -> Result<()> {
    match command {
        UserCommand::Add { email, credits } => {
            let credits = credits.unwrap_or(config.chat.signup_credits);
            if credits < 0 {
                bail!("Starting credits cannot be negative");
            }
            let (profile, token) = db.create_profile(email.as_deref(), credits).await?;
            tracing::info!(user_id = %profile.id, credits, "Created user");

            if json {
                let value = serde_json::json!({
                    "id": profile.id,
                    "email": profile.email,
                    "credits": profile.credits,
                    "token": token,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("User:    {}", profile.id);
                println!("Credits: {}", profile.credits);
                println!("Token:   {token}");
                println!();
                println!("The token is shown once. Send it as `Authorization: Bearer <token>`.");
            }
        }
        UserCommand::List => {
            let profiles = db.list_profiles().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else {
                pretty::print_profiles(&profiles);
            }
        }
    }
    Ok(())
}

async fn cmd_credits(db: &Database, command: CreditsCommand, json: bool) -> Result<()> {
    let (user, balance) = match command {
        CreditsCommand::Show { user } => {
            let balance = db.credits_for(&user).await?;
            (user, balance)
        }
        CreditsCommand::Grant { user, amount } => {
            if amount <= 0 {
                bail!("Grant amount must be positive");
            }
            let balance = db.add_credits(&user, amount).await?;
            tracing::info!(user_id = %user, amount, balance, "Granted credits");
            (user, balance)
        }
    };

    if json {
        println!("{}", serde_json::json!({ "user": user, "credits": balance }));
    } else {
        println!("{user}: {balance} credit{}", if balance == 1 { "" } else { "s" });
    }
    Ok(())
}

async fn cmd_chats(db: &Database, command: ChatsCommand, json: bool) -> Result<()> {
    match command {
        ChatsCommand::List { user, limit } => {
            let chats = db.list_chats(&user, Some(limit)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chats)?);
            } else {
                pretty::print_chats(&chats);
            }
        }
        ChatsCommand::Show { id } => {
            let chat = db
                .get_chat(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Chat not found: {id}"))?;
            let messages = db.get_messages(&id).await?;
            if json {
                let value = serde_json::json!({ "chat": chat, "messages": messages });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                pretty::print_transcript(&chat, &messages);
            }
        }
    }
    Ok(())
}

fn cmd_config(path: &Path, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Path => {
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to_path(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
