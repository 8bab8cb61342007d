//! record_dataset - ask running collectors to record a dataset.
//!
//! Writes the `save_dataset` command into the shared store. Collectors pick
//! it up on their next poll; the entry expires on its own after `--ttl-secs`
//! so a command that nobody consumed does not linger.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::time::Duration;

use frame_collector::{RecordingTrigger, SqliteTtlStore, TtlStore, TRIGGER_KEY};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Request a time-boxed dataset recording from running frame collectors"
)]
struct Args {
    /// Recording duration in minutes.
    #[arg(long)]
    minutes: u32,

    /// Upload destination (http:// or https://).
    #[arg(long, env = "FRAME_COLLECTOR_UPLOAD_URL")]
    url: String,

    #[arg(long, env = "FRAME_COLLECTOR_UPLOAD_USER")]
    username: String,

    #[arg(long, env = "FRAME_COLLECTOR_UPLOAD_PASSWORD", hide_env_values = true)]
    password: String,

    /// Path to the shared store.
    #[arg(long, env = "FRAME_COLLECTOR_STORE_PATH", default_value = "frame_collector.db")]
    store_path: String,

    /// Lifetime of the command in the store. Should cover at least one poll interval.
    #[arg(long, default_value_t = 120)]
    ttl_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.ttl_secs == 0 {
        return Err(anyhow!("--ttl-secs must be greater than zero"));
    }

    let payload = serde_json::json!({
        "time": args.minutes.to_string(),
        "url": args.url,
        "username": args.username,
        "user_password": args.password,
    });
    // Refuse anything the collectors would reject.
    let trigger = RecordingTrigger::from_value(&payload).context("invalid recording request")?;

    let store = SqliteTtlStore::open(&args.store_path)
        .with_context(|| format!("open store {}", args.store_path))?;
    store.set(
        TRIGGER_KEY,
        &serde_json::to_vec(&payload)?,
        Some(Duration::from_secs(args.ttl_secs)),
    )?;

    log::info!(
        "recording of {} minute(s) requested; upload to {} as {} (command expires in {}s)",
        trigger.duration.num_minutes(),
        trigger.destination.url,
        trigger.destination.username,
        args.ttl_secs
    );
    Ok(())
}
