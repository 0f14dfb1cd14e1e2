use std::sync::Arc;

use log::{error, info, warn};
use uuid::Uuid;

use kanban_sync::{
    AccessGate, ActivityLog, ActivityLogConfig, BoardService, ChannelManager, ChannelSlot,
    MemoryActivityLog, MemoryStore, RocksActivityLog, ServerConfig, StaticTokenProvider,
    SyncServer,
};

const DEFAULT_LISTS: [&str; 3] = ["To Do", "In Progress", "Done"];

fn open_activity_log(config: &ServerConfig) -> Result<Arc<dyn ActivityLog>, kanban_sync::StoreError> {
    match &config.activity_path {
        Some(path) => {
            let log = RocksActivityLog::open(ActivityLogConfig {
                path: path.clone(),
                ..ActivityLogConfig::default()
            })?;
            info!("Activity log at {}", log.path().display());
            Ok(Arc::new(log))
        }
        None => {
            info!("Activity log kept in memory");
            Ok(Arc::new(MemoryActivityLog::new()))
        }
    }
}

/// `KANBAN_SEED_BOARD=name:owner_uuid` creates a board with the default
/// lists at startup.
async fn seed_board(service: &BoardService<MemoryStore>, value: &str) {
    let Some((name, owner)) = value.rsplit_once(':') else {
        warn!("Ignoring KANBAN_SEED_BOARD={value:?}: expected name:owner_uuid");
        return;
    };
    let owner = match Uuid::parse_str(owner.trim()) {
        Ok(owner) => owner,
        Err(e) => {
            warn!("Ignoring KANBAN_SEED_BOARD owner '{owner}': {e}");
            return;
        }
    };

    let board = match service.create_board(owner, name.trim()).await {
        Ok(board) => board,
        Err(e) => {
            error!("Failed to seed board: {e}");
            return;
        }
    };
    for list in DEFAULT_LISTS {
        if let Err(e) = service.create_list(owner, board.id, list).await {
            error!("Failed to seed list '{list}': {e}");
        }
    }
    info!("Seeded board '{}' ({}) owned by {owner}", board.name, board.id);
}

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting kanban sync server...");

    let config = ServerConfig::from_env();

    let tokens = std::env::var("KANBAN_TOKENS").unwrap_or_default();
    let provider = match StaticTokenProvider::parse(&tokens) {
        Ok(provider) => provider,
        Err(e) => {
            error!("Invalid KANBAN_TOKENS: {e}");
            std::process::exit(1);
        }
    };
    if provider.is_empty() {
        warn!("KANBAN_TOKENS is empty: every handshake will be rejected");
    } else {
        info!("Loaded {} token(s)", provider.len());
    }

    let activity = match open_activity_log(&config) {
        Ok(activity) => activity,
        Err(e) => {
            error!("Failed to open activity log: {e}");
            std::process::exit(1);
        }
    };

    let store = Arc::new(MemoryStore::new());
    let slot = Arc::new(ChannelSlot::new());
    let service = BoardService::new(store.clone(), slot.clone(), activity);

    let channel = Arc::new(
        ChannelManager::new(Arc::new(provider), config.channel_config())
            .with_gate(AccessGate::new(store)),
    );
    if slot.install(channel.clone()).is_err() {
        error!("Realtime channel installed twice");
        std::process::exit(1);
    }

    if let Ok(value) = std::env::var("KANBAN_SEED_BOARD") {
        seed_board(&service, &value).await;
    }

    let server = SyncServer::new(config, channel);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connection(s) served, {} handshake(s) rejected",
                stats.total_connections, stats.rejected_handshakes
            );
        }
    }
}
