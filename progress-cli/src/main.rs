use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use progress_sync::{NetworkStatus, ProgressSync, ProgressUpdate, ReviewKind, SyncConfig, Theme};
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Inspect and synchronize user progress against the hosted progress table
#[derive(Parser, Debug)]
#[command(name = "progressctl")]
#[command(about = "Offline-first user progress sync client")]
struct Args {
    /// Backend base URL (overrides PROGRESS_SYNC_REMOTE_URL)
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Local cache database path (overrides PROGRESS_SYNC_LOCAL_DB)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Reconciliation period in seconds (overrides PROGRESS_SYNC_INTERVAL_SECS)
    #[arg(long, global = true)]
    interval_secs: Option<u64>,

    /// Session token of the signed-in user
    #[arg(long, global = true, env = "PROGRESS_SYNC_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure a progress record exists
    Init { user_id: String },

    /// Read progress, falling back to the local cache when offline
    Fetch { user_id: String },

    /// Overwrite individual progress fields
    Update {
        user_id: String,
        #[arg(long)]
        balance: Option<f64>,
        #[arg(long)]
        wheels: Option<u32>,
        #[arg(long)]
        theme: Option<Theme>,
        /// Raw camelCase update payload, e.g. '{"reviewsLimit": 15}'
        #[arg(long, conflicts_with_all = ["balance", "wheels", "theme"])]
        json: Option<String>,
    },

    /// Add (or with a negative value, spend) points
    Points {
        user_id: String,
        #[arg(allow_hyphen_values = true)]
        delta: f64,
    },

    /// Use one reward wheel
    Wheel { user_id: String },

    /// Count a completed review
    Review {
        user_id: String,
        #[arg(long, value_enum, default_value = "like")]
        kind: KindArg,
    },

    /// Run one reconciliation pass
    Reconcile { user_id: String },

    /// Keep a sync session running until interrupted
    Watch {
        user_id: String,
        /// Remove the local record and markers on exit
        #[arg(long)]
        sign_out: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Like,
    Inspector,
}

impl From<KindArg> for ReviewKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Like => ReviewKind::Like,
            KindArg::Inspector => ReviewKind::Inspector,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = load_config(&args)?;
    info!(
        remote_url = %config.remote_url,
        db = %config.local_db_path,
        "Opening progress sync"
    );
    let sync = ProgressSync::connect(config)
        .await
        .context("failed to open progress sync")?;
    sync.set_access_token(args.access_token.clone());

    match args.command {
        Command::Init { user_id } => print_json(&sync.initialize_progress(&user_id).await?)?,
        Command::Fetch { user_id } => print_json(&sync.fetch_progress(&user_id).await?)?,
        Command::Update {
            user_id,
            balance,
            wheels,
            theme,
            json,
        } => {
            let update = match json {
                Some(raw) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&raw).context("--json is not valid JSON")?;
                    ProgressUpdate::from_json(value)?
                }
                None => build_update(balance, wheels, theme)?,
            };
            print_json(&sync.update_progress(&user_id, &update).await?)?;
        }
        Command::Points { user_id, delta } => {
            print_json(&sync.add_points(&user_id, delta).await?)?
        }
        Command::Wheel { user_id } => print_json(&sync.consume_wheel(&user_id).await?)?,
        Command::Review { user_id, kind } => {
            print_json(&sync.record_review(&user_id, kind.into()).await?)?
        }
        Command::Reconcile { user_id } => print_json(&sync.reconcile_now(&user_id).await)?,
        Command::Watch { user_id, sign_out } => watch(&sync, &user_id, sign_out).await?,
    }

    Ok(())
}

async fn watch(sync: &ProgressSync, user_id: &str, sign_out: bool) -> Result<()> {
    let started = sync.start_session(user_id).await?;
    print_json(&started)?;

    // This process has no connectivity signal of its own
    sync.network().set_status(NetworkStatus::Online);
    info!(
        user_id = user_id,
        interval_secs = sync.config().sync_interval.as_secs(),
        "Watching progress, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;

    sync.end_session(user_id, sign_out).await?;
    sync.shutdown().await;
    info!(user_id = user_id, "Session ended");
    Ok(())
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = SyncConfig::from_env().context("invalid PROGRESS_SYNC_* configuration")?;
    if let Some(url) = &args.remote_url {
        config.remote_url = url.clone();
    }
    if let Some(db) = &args.db {
        config.local_db_path = db.clone();
    }
    if let Some(secs) = args.interval_secs {
        config.sync_interval = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

fn build_update(
    balance: Option<f64>,
    wheels: Option<u32>,
    theme: Option<Theme>,
) -> Result<ProgressUpdate> {
    let mut update = ProgressUpdate::new();
    if let Some(balance) = balance {
        update = update.with_balance(balance);
    }
    if let Some(wheels) = wheels {
        update = update.with_wheels_remaining(wheels);
    }
    if let Some(theme) = theme {
        update = update.with_theme(theme);
    }
    if update.is_empty() {
        bail!("nothing to update: pass --balance, --wheels, --theme or --json");
    }
    Ok(update)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "progress_sync={},progressctl={},sqlx=warn,reqwest=info",
            level, level
        )
        .into()
    });

    let json = env::var("PROGRESS_SYNC_LOG_FORMAT")
        .is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    // stdout carries command output; logs go to stderr
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["progressctl", "points", "user-a", "-5"]).unwrap();
        assert!(matches!(args.command, Command::Points { delta, .. } if delta == -5.0));

        let args =
            Args::try_parse_from(["progressctl", "update", "user-a", "--theme", "dark"]).unwrap();
        assert!(matches!(args.command, Command::Update { theme: Some(Theme::Dark), .. }));
    }

    #[test]
    fn test_update_requires_a_field() {
        assert!(build_update(None, None, None).is_err());
        let update = build_update(Some(3.0), None, Some(Theme::System)).unwrap();
        assert_eq!(update.balance, Some(3.0));
        assert_eq!(update.theme, Some(Theme::System));
    }

    #[test]
    fn test_json_conflicts_with_flags() {
        let result = Args::try_parse_from([
            "progressctl",
            "update",
            "user-a",
            "--balance",
            "1",
            "--json",
            "{}",
        ]);
        assert!(result.is_err());
    }
}
