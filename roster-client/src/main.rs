//! ROSTER CLI entry point.

use roster_cache::{Collaborators, FileStore, GetUserDataOptions, StaticSession, UserDataContext};
use roster_client::{init_tracing, ClientConfig, ClientError, Command, HttpUserApi};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    init_tracing()?;
    let config = ClientConfig::load()?;
    let command = Command::from_args(std::env::args().skip(1));

    let api = Arc::new(HttpUserApi::new(&config)?);
    let store = Arc::new(FileStore::open(&config.store_path)?);
    let session = Arc::new(StaticSession::logged_in(
        config.auth_token.clone(),
        config.session_id.clone(),
    ));
    let context = UserDataContext::create(
        Collaborators::new(api, store, session),
        config.cache_policy(),
    )?;
    let manager = context.manager();

    match command {
        Command::Clear => {
            manager.clear();
            info!(store = %config.store_path.display(), "Cleared user data");
        }
        Command::Cached => {
            let record = manager.get_cached_user_data();
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Fetch { force_refresh } => {
            let mut options = GetUserDataOptions::new();
            if force_refresh {
                options = options.force_refresh();
            }
            let read = manager.read_user_data(options).await?;
            if let Some(read) = &read {
                info!(tier = %read.tier(), fetched_at = ?read.fetched_at(), "User data read");
            }
            let record = read.map(|read| read.into_value());
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    info!(stats = ?manager.stats(), "Done");
    context.dispose();
    Ok(())
}
