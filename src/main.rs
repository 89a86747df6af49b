use std::sync::Arc;

use danci_practice::config::Config;
use danci_practice::db::Database;
use danci_practice::engine::PracticeEngine;
use danci_practice::logging;
use danci_practice::services::generator::ContentGenerator;
use danci_practice::services::lexicon::Lexicon;
use danci_practice::services::llm_provider::LLMProvider;
use danci_practice::services::vocabulary::ConceptVocabulary;
use danci_practice::workers::{PregenerationQueue, WorkerManager};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log);

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(err) => {
            tracing::error!(error = %err, path = %config.database.path.display(), "database not initialized");
            std::process::exit(1);
        }
    };

    let lexicon = match config.lexicon_path.as_deref() {
        Some(path) => Lexicon::load(path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, path = %path.display(), "lexicon not loaded, continuing without it");
            Lexicon::empty()
        }),
        None => Lexicon::empty(),
    };

    let provider = LLMProvider::new(config.llm.clone());
    if !provider.is_available() {
        tracing::warn!("LLM_API_KEY not set, content generation will fail until configured");
    }
    let backend = Arc::new(provider);

    let (queue, receiver) = PregenerationQueue::channel();
    let engine = PracticeEngine::new(
        db.clone(),
        Arc::new(ConceptVocabulary::new(db.clone())),
        backend.clone(),
        ContentGenerator::new(backend, config.generation.clone()),
        Arc::new(lexicon),
        config.srs.clone(),
    )
    .with_pregeneration(queue.clone());

    let worker_manager = match WorkerManager::new(engine, queue).await {
        Ok(manager) => {
            if let Err(e) = manager.start(receiver).await {
                tracing::error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    tracing::info!("practice engine running");
    shutdown_signal().await;
    tracing::info!("shutdown requested, stopping workers");

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }
    db.close().await;

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
