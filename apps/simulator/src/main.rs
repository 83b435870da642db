use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use capture_core::{
    sequence::{TARGET_COUNT, TARGET_SPACING_DEG},
    CaptureOrchestrator, HttpPanoramaBackend, ScriptedHeadingSource, SessionEvent,
    StaticFrameSource,
};
use clap::Parser;
use tokio::{sync::broadcast, time::timeout};

/// Drives one full simulated capture session against a running
/// stitching service: sweeps the heading through the twelve targets,
/// captures a synthetic frame at each, and waits for the panorama URL.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8470")]
    server_url: String,
}

async fn wait_until_aligned(events: &mut broadcast::Receiver<SessionEvent>) -> Result<()> {
    timeout(Duration::from_secs(1), async {
        loop {
            if let SessionEvent::HeadingUpdated { aligned: true, .. } =
                events.recv().await.expect("event stream open")
            {
                break;
            }
        }
    })
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let heading = Arc::new(ScriptedHeadingSource::granted());
    let frames = Arc::new(StaticFrameSource::new());
    let backend = Arc::new(HttpPanoramaBackend::new(&args.server_url)?);
    let orchestrator = CaptureOrchestrator::new(heading.clone(), frames, backend);
    let mut events = orchestrator.subscribe_events();

    if !orchestrator.request_permissions().await {
        let view = orchestrator.view().await;
        bail!(
            "permissions refused: {}",
            view.failure.unwrap_or_else(|| "unknown".to_string())
        );
    }
    println!("Session {} started", orchestrator.session_id());

    for step in 0..TARGET_COUNT {
        let target = step as f64 * TARGET_SPACING_DEG;
        heading.emit(target);
        wait_until_aligned(&mut events).await?;
        orchestrator.request_capture().await;

        let view = orchestrator.view().await;
        println!(
            "Captured {target:>3}°  ({}/{})",
            view.captured_count, TARGET_COUNT
        );
    }

    let outcome = timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await.expect("event stream open") {
                SessionEvent::Completed { url } => break Ok(url),
                SessionEvent::Failed { reason } => break Err(reason),
                _ => {}
            }
        }
    })
    .await?;

    orchestrator.shutdown().await;

    match outcome {
        Ok(url) => {
            println!("Panorama ready at {url}");
            Ok(())
        }
        Err(reason) => bail!("stitching failed: {reason}"),
    }
}
