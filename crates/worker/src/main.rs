use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use framechain_comfyui::RenderClient;
use framechain_pipeline::session::classify_source;
use framechain_worker::config::WorkerConfig;
use framechain_worker::{
    build_orchestrator, build_renderer, load_plan_request, load_request, spawn_progress_logger,
};

const USAGE: &str = "usage:
  framechain-worker run <request.json>
  framechain-worker plan <planner-answer.txt> <image|video>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "framechain_worker=info,framechain_pipeline=info,framechain_comfyui=info,framechain_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["run", path] => load_request(&PathBuf::from(*path)).await?,
        ["plan", path, source] => {
            let source = classify_source(PathBuf::from(*source));
            load_plan_request(&PathBuf::from(*path), source).await?
        }
        _ => bail!("{USAGE}"),
    };

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        segments = request.segments.len(),
        total_frames = request.total_frames(),
        "Worker starting",
    );

    let renderer = Arc::new(build_renderer(&config));
    renderer
        .health_check()
        .await
        .with_context(|| format!("render server at {} is not reachable", config.comfyui_url))?;

    let orchestrator = build_orchestrator(&config, renderer)
        .await
        .context("failed to set up the pipeline")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current segment");
            on_signal.cancel();
        }
    });

    let (tx, reporter) = spawn_progress_logger();

    let outcome = orchestrator.run_with_progress(request, cancel, tx).await;
    let _ = reporter.await;

    match outcome {
        Ok(result) => {
            println!("{}", result.video.display());
            Ok(())
        }
        Err(e) => {
            let kind = e.kind();
            Err(anyhow::Error::new(e).context(format!("long video failed ({kind:?})")))
        }
    }
}
