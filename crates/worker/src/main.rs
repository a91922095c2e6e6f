//! `aigc-worker` -- drives AIGC tasks against one remote server.
//!
//! Probes the server, resumes every unfinished task from the seed file and
//! keeps driving them until interrupted. On Ctrl-C the in-flight job is
//! cancelled on the server and unfinished tasks are left for the next run.
//!
//! Configuration is read from the environment (a `.env` file is honoured);
//! see [`config::WorkerConfig::from_env`].

mod config;
mod seed;

use std::sync::Arc;

use aigc_core::files::{FsLocalFiles, LocalFiles};
use aigc_events::EventBus;
use aigc_remote::{RemoteServer, ServerFunctions, ServerOptions};
use aigc_tasks::{
    MemoryRecordStore, SoundTtsParam, SoundTtsTask, StaticMediaAssets, StaticServerRegistry,
    TaskContext, TaskDriver, VideoGenParam, VideoGenTask,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;
use crate::seed::TasksFile;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aigc_worker=info,aigc_remote=info,aigc_tasks=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        server = %config.remote.connection.name,
        url = %config.remote.connection.base_url,
        data_dir = %config.data_dir.display(),
        "Starting aigc-worker",
    );

    let events = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let event_log = tokio::spawn(log_events(Arc::clone(&events), cancel.clone()));

    let files: Arc<dyn LocalFiles> = Arc::new(FsLocalFiles::new(&config.data_dir));
    let server = Arc::new(RemoteServer::over_http(
        config.remote.connection.clone(),
        Arc::clone(&files),
        Arc::clone(&events),
        ServerOptions {
            poller: config.remote.poller,
            ..ServerOptions::default()
        },
    ));
    server.start().await?;

    let seed = match &config.tasks_file {
        Some(path) => TasksFile::load(path).await?,
        None => TasksFile::default(),
    };

    let sound_tts_store = Arc::new(MemoryRecordStore::<SoundTtsParam>::new());
    let video_gen_store = Arc::new(MemoryRecordStore::<VideoGenParam>::new());
    seed.sound_tts.into_iter().for_each(|r| sound_tts_store.insert(r));
    seed.video_gen.into_iter().for_each(|r| video_gen_store.insert(r));

    let mut registry = StaticServerRegistry::new();
    registry.register(
        config.remote.connection.name.clone(),
        config.remote.connection.version.clone(),
        Arc::clone(&server) as Arc<dyn ServerFunctions>,
    );
    let registry = Arc::new(registry);

    let assets = seed.video_templates.into_iter().fold(
        StaticMediaAssets::new(Arc::clone(&sound_tts_store) as _),
        |assets, (id, video)| assets.with_template(id, video),
    );
    let assets = seed
        .sound_clone_outputs
        .into_iter()
        .fold(assets, |assets, (id, sound)| assets.with_clone_output(id, sound));

    let sound_tts = SoundTtsTask::new(TaskContext::new(
        sound_tts_store as _,
        Arc::clone(&registry) as _,
        Arc::clone(&files),
    ));
    let video_gen = VideoGenTask::new(
        TaskContext::new(video_gen_store as _, registry as _, Arc::clone(&files)),
        Arc::new(assets),
    );

    let mut handles = Vec::new();
    for biz in [
        Arc::new(sound_tts) as Arc<dyn aigc_tasks::TaskBiz>,
        Arc::new(video_gen) as Arc<dyn aigc_tasks::TaskBiz>,
    ] {
        let driver = Arc::new(
            TaskDriver::new(biz, cancel.clone())
                .with_retry_interval(config.retry_interval)
                .with_query_interval(config.retry_interval),
        );
        handles.extend(driver.restore().await?);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    cancel.cancel();
    server.cancel().await;

    for handle in handles {
        match handle.await {
            Ok(outcome) => tracing::debug!(outcome = ?outcome, "Task driver finished"),
            Err(e) => tracing::error!(error = %e, "Task driver panicked"),
        }
    }
    server.stop().await;
    let _ = event_log.await;

    tracing::info!("aigc-worker stopped");
    Ok(())
}

/// Mirror server events into the log until shutdown.
async fn log_events(events: Arc<EventBus>, cancel: CancellationToken) {
    let mut rx = events.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => tracing::info!(
                    server = %event.server,
                    kind = ?event.kind,
                    data = %event.data,
                    "Server event",
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
