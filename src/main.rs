//! CareMatch ledger operator tool
//!
//! ## Usage
//!
//! ```bash
//! # Create the storage directory, database and default config
//! carematch-ledger init
//!
//! # Register accounts and link a caregiver
//! carematch-ledger account create --id p-1 --role participant --store store-a --name Mabel
//! carematch-ledger link --caregiver c-1 --participant p-1
//!
//! # Settle a match recorded as JSON
//! carematch-ledger settle --file match.json
//!
//! # Grant local points (operator identity from a bearer token)
//! CAREMATCH_TOKEN=... carematch-ledger grant --account p-1 --amount 200 --reason "Helped set up"
//!
//! # Check every wallet against its ledger
//! carematch-ledger reconcile
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use carematch_ledger::auth::{CurrentAccount, JwtIdentity, JwtValidator};
use carematch_ledger::db::{AccountQuery, CreateAccountInput, MatchQuery, Role, TransactionQuery};
use carematch_ledger::services::{spawn_logging_listener, GrantRequest, RedeemRequest, RoundInput, SettleRequest};
use carematch_ledger::{Config, LedgerDb, LedgerError, LogChannel, NotificationChannel, Services, WebhookChannel};

#[derive(Parser, Debug)]
#[command(name = "carematch-ledger")]
#[command(about = "Points wallet ledger and match settlement")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CAREMATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CAREMATCH_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Push gateway URL for notifications
    #[arg(long, env = "CAREMATCH_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Secret for signing and verifying bearer tokens
    #[arg(long, env = "CAREMATCH_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the storage directory, database and default config
    Init,

    /// Account directory
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Link a caregiver to a participant
    Link {
        #[arg(long)]
        caregiver: String,
        #[arg(long)]
        participant: String,
    },

    /// Remove a caregiver link
    Unlink {
        #[arg(long)]
        caregiver: String,
        #[arg(long)]
        participant: String,
    },

    /// Copy legacy single caregiver links into the link table
    BackfillLinks,

    /// Settle a match from a JSON file
    Settle {
        #[arg(long)]
        file: PathBuf,
    },

    /// Credit participants a settlement missed
    Recredit {
        #[arg(long)]
        match_id: String,
        #[arg(long)]
        actor: Option<String>,
    },

    /// Replace a match's rounds from a JSON array file
    Edit {
        #[arg(long)]
        match_id: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        actor: Option<String>,
    },

    /// Soft-delete a match
    Delete {
        #[arg(long)]
        match_id: String,
        #[arg(long)]
        actor: Option<String>,
    },

    /// Show a match, or list recent matches
    Matches {
        #[arg(long)]
        match_id: Option<String>,
        #[arg(long)]
        store: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Grant local points
    Grant {
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        reason: String,
        /// Bearer token naming the operator
        #[arg(long, env = "CAREMATCH_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Operator id, when no token is given
        #[arg(long)]
        operator: Option<String>,
        /// Store id, when no token is given
        #[arg(long)]
        store: Option<String>,
    },

    /// Redeem local points
    Redeem {
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        description: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        store: String,
    },

    /// Show a wallet and its recent history
    Wallet {
        #[arg(long)]
        account: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Compare balances with ledger sums
    Reconcile {
        #[arg(long)]
        account: Option<String>,
    },

    /// Issue a bearer token for an account
    Token {
        #[arg(long)]
        account: String,
        #[arg(long)]
        role: Role,
        #[arg(long)]
        store: Option<String>,
        #[arg(long, default_value_t = 3600)]
        ttl_seconds: u64,
    },

    /// Database statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        role: Role,
        #[arg(long)]
        store: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    List {
        #[arg(long)]
        role: Option<Role>,
        #[arg(long)]
        store: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("carematch_ledger=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    // CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(url) = args.webhook_url {
        config.notifications.webhook_url = Some(url);
    }
    if let Some(secret) = args.jwt_secret {
        config.jwt_secret = Some(secret);
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let db = Arc::new(LedgerDb::open(&config.database_path(), config.pool_size)?);

    if let Command::Init = args.command {
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }
        info!(database = %config.database_path().display(), "Ledger initialised");
        return Ok(());
    }

    let channel: Arc<dyn NotificationChannel> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookChannel::new(url.clone())?),
        None => Arc::new(LogChannel),
    };

    let (services, dispatcher) = Services::new(db.clone(), &config, channel);
    let listener = spawn_logging_listener(services.events.clone());
    let result = run(args.command, &services, &db, &config).await;

    if let Some(e) = result.as_ref().err().and_then(|e| e.downcast_ref::<LedgerError>()) {
        if e.is_rejection() {
            warn!(error = %e, "Request rejected");
        }
    }

    // Let queued notifications finish before exiting
    drop(services);
    if let Err(e) = dispatcher.await {
        warn!(error = %e, "Notification dispatcher ended abnormally");
    }
    let _ = listener.await;

    result
}

async fn run(command: Command, services: &Services, db: &Arc<LedgerDb>, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Init => Ok(()),

        Command::Account { command } => match command {
            AccountCommand::Create { id, role, store, name } => {
                let account = services
                    .accounts
                    .create(CreateAccountInput {
                        id,
                        role,
                        store_id: store,
                        display_name: name,
                    })
                    .await?;
                print_json(&account)
            }
            AccountCommand::List { role, store } => {
                let accounts = services
                    .accounts
                    .list(AccountQuery {
                        role,
                        store_id: store,
                        limit: 1000,
                        offset: 0,
                    })
                    .await?;
                print_json(&accounts)
            }
        },

        Command::Link { caregiver, participant } => {
            print_json(&services.accounts.link(&caregiver, &participant).await?)
        }

        Command::Unlink { caregiver, participant } => {
            let removed = services.accounts.unlink(&caregiver, &participant).await?;
            print_json(&serde_json::json!({ "removed": removed }))
        }

        Command::BackfillLinks => {
            let created = services.accounts.backfill_links().await?;
            print_json(&serde_json::json!({ "created": created }))
        }

        Command::Settle { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let request: SettleRequest = serde_json::from_str(&raw).context("parsing match file")?;
            print_json(&services.settlement.settle(request).await?)
        }

        Command::Recredit { match_id, actor } => {
            print_json(&services.settlement.recredit(&match_id, actor.as_deref()).await?)
        }

        Command::Edit { match_id, file, actor } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let rounds: Vec<RoundInput> = serde_json::from_str(&raw).context("parsing rounds file")?;
            print_json(
                &services
                    .settlement
                    .edit_rounds(&match_id, rounds, actor.as_deref())
                    .await?,
            )
        }

        Command::Delete { match_id, actor } => {
            let deleted = services.settlement.delete_match(&match_id, actor.as_deref()).await?;
            print_json(&serde_json::json!({ "match_id": match_id, "deleted": deleted }))
        }

        Command::Matches { match_id: Some(id), .. } => print_json(&services.settlement.get_match(&id).await?),

        Command::Matches { match_id: None, store, limit } => {
            let matches = services
                .settlement
                .list_matches(MatchQuery {
                    store_id: store,
                    limit,
                    ..Default::default()
                })
                .await?;
            print_json(&matches)
        }

        Command::Grant {
            account,
            amount,
            reason,
            token,
            operator,
            store,
        } => {
            let receipt = match (token, operator, store) {
                (Some(token), _, _) => {
                    let validator = jwt_validator(config)?;
                    let identity = JwtIdentity::from_token(&validator, Some(&token));
                    services
                        .grants
                        .grant_as_current(&identity, &account, amount, &reason)
                        .await?
                }
                (None, Some(operator_id), Some(store_id)) => {
                    services
                        .grants
                        .grant(GrantRequest {
                            account_id: account,
                            local_amount: amount,
                            reason,
                            store_id,
                            operator_id,
                        })
                        .await?
                }
                _ => bail!("grant needs --token, or both --operator and --store"),
            };
            print_json(&receipt)
        }

        Command::Redeem {
            account,
            amount,
            description,
            operator,
            store,
        } => {
            let receipt = services
                .grants
                .redeem(RedeemRequest {
                    account_id: account,
                    amount,
                    description,
                    store_id: store,
                    operator_id: operator,
                })
                .await?;
            print_json(&receipt)
        }

        Command::Wallet { account, limit } => {
            let wallet = services.wallets.get_or_create(&account).await?;
            let history = services
                .wallets
                .history(&account, TransactionQuery::recent(limit))
                .await?;
            print_json(&serde_json::json!({ "wallet": wallet, "history": history }))
        }

        Command::Reconcile { account: Some(account) } => {
            print_json(&services.wallets.reconcile(&account).await?)
        }

        Command::Reconcile { account: None } => {
            let reports = services.wallets.reconcile_all().await?;
            let inconsistent = reports.iter().filter(|r| !r.consistent).count();
            if inconsistent > 0 {
                warn!(inconsistent = inconsistent, "Wallets out of balance with the ledger");
            }
            print_json(&reports)
        }

        Command::Token {
            account,
            role,
            store,
            ttl_seconds,
        } => {
            let validator = JwtValidator::new(jwt_secret(config)?, ttl_seconds)?;
            let token = validator.generate_token(&CurrentAccount {
                id: account,
                role,
                store_id: store,
            })?;
            println!("{}", token);
            Ok(())
        }

        Command::Stats => print_json(&db.stats()?),
    }
}

fn jwt_secret(config: &Config) -> anyhow::Result<String> {
    config
        .jwt_secret
        .clone()
        .context("jwt_secret is not configured (set CAREMATCH_JWT_SECRET)")
}

fn jwt_validator(config: &Config) -> anyhow::Result<JwtValidator> {
    Ok(JwtValidator::new(jwt_secret(config)?, 3600)?)
}
