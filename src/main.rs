//! relaychat - terminal client for a remote chat assistant
//!
//! Text, voice and file turns go to the backend one at a time; conversations
//! are cached locally so the client stays useful while the backend is down.

mod cache;
mod config;
mod gateway;
mod model;
mod preferences;
mod repl;
mod runtime;
mod session;
mod speech;
mod store;

use cache::CacheDb;
use config::ClientConfig;
use gateway::{AuthSession, Gateway, HttpGateway, LoggingGateway, VoiceOptions};
use preferences::Preferences;
use runtime::{CacheStore, ProductionRuntime, SqliteCache};
use speech::CommandSpeech;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout belongs to the conversation; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaychat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)?;

    let cache_path = config.cache_path();
    tracing::info!(path = %cache_path.display(), "Opening cache");
    let cache = Arc::new(SqliteCache::new(CacheDb::open(&cache_path)?));

    let auth_cache: Arc<dyn CacheStore> = cache.clone();
    let auth = Arc::new(AuthSession::load(auth_cache, config.token_override.clone()).await);

    tracing::info!(
        url = %config.backend_url,
        authenticated = auth.is_authenticated(),
        "Using backend"
    );
    let http: Arc<dyn Gateway> = Arc::new(HttpGateway::new(
        config.backend_url.clone(),
        config.request_timeout,
        auth,
    )?);
    let gateway = Arc::new(LoggingGateway::new(http));

    let preferences = Preferences::load(cache.as_ref()).await;
    let speech = Arc::new(CommandSpeech::new(
        config.capture_command.clone(),
        config.player_command.clone(),
    ));
    let voice = VoiceOptions {
        voice_id: config.voice_id.clone(),
        tts_model: config.tts_model.clone(),
        tts_output: config.tts_output.clone(),
    };

    let (runtime, handle) = ProductionRuntime::new(gateway, cache, speech, preferences, voice);
    let events = handle.subscribe();
    let session = tokio::spawn(runtime.run());

    repl::run(handle, events).await?;
    session.await?;
    Ok(())
}
