//! Inspect the local sync database.
//!
//! Prints the pending and failed action queues and the persisted realtime
//! cursors. Usage: `prayersync-inspect [config.toml]`

use prayersync::local_db::{KeyValueStore, LocalDatabase};
use prayersync::offline::{ActionQueue, QueuedAction};
use prayersync::shared::config::SyncConfig;
use prayersync::shared::event::SyncCursor;
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "prayersync.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "prayersync=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match SyncConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("[Config] {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    match inspect(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("[LocalDb] Inspection failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn inspect(config: &SyncConfig) -> prayersync::Result<()> {
    tracing::info!("[LocalDb] Opening {}", config.database_path.display());
    let db = Arc::new(LocalDatabase::open(&config.database_path).await?);
    let queue = ActionQueue::new(db.clone());

    let pending = queue.list_pending().await?;
    println!("Pending actions ({})", pending.len());
    for action in &pending {
        print_action(action);
    }

    let failed = queue.list_failed().await?;
    println!("\nFailed actions ({})", failed.len());
    for action in &failed {
        print_action(action);
    }

    let keys = db.keys_with_prefix("sync_cursor/").await?;
    println!("\nSync cursors ({})", keys.len());
    for key in keys {
        let Some(raw) = db.get(&key).await? else {
            continue;
        };
        match serde_json::from_slice::<SyncCursor>(&raw) {
            Ok(cursor) => println!("  {}  {}", key, cursor.committed_at.to_rfc3339()),
            Err(e) => println!("  {}  <unreadable: {}>", key, e),
        }
    }
    Ok(())
}

fn print_action(action: &QueuedAction) {
    let entity = action
        .entity_id
        .as_ref()
        .map_or("-", |id| id.as_str());
    println!(
        "  {}  {:?}  {}/{}  attempts={}  enqueued={}",
        action.id,
        action.kind,
        action.channel,
        entity,
        action.attempt_count,
        action.enqueued_at.to_rfc3339()
    );
    if let Some(error) = &action.last_error {
        println!("      last error: {}", error);
    }
}
