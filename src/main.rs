/// Interactive driver for the ridership refresh pipeline.
///
/// Reads `key=value` filter changes from stdin (one per line, e.g.
/// `station=127`, `hour=17`, `scale=auto`) and prints what each change did
/// along with the tallest bars once it has rendered. Changes are applied
/// concurrently, so a quick second line supersedes a slow first one.

use std::process::ExitCode;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};

use ridership_service::animation::{FrameLoop, SharedEngine};
use ridership_service::cache::RidershipCache;
use ridership_service::config::{DEFAULT_CONFIG_PATH, ServiceConfig};
use ridership_service::coordinator::RequestCoordinator;
use ridership_service::ingest::backend::{HttpBackend, RidershipBackend};
use ridership_service::logging::{self, Component};
use ridership_service::model::FetchError;
use ridership_service::orchestrator::{ChangeOutcome, Orchestrator, OrchestratorSettings};
use ridership_service::selection::{FilterDelta, FilterSelection};
use ridership_service::stations::StationCatalog;

const TOP_STATIONS: usize = 5;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config_path =
        std::env::var("RIDERSHIP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match ServiceConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    let level = match config.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.timestamps);

    let catalog = match StationCatalog::load(&config.catalog_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            logging::error(
                Component::System,
                None,
                &format!("station catalog {}: {}", config.catalog_path, e),
            );
            return ExitCode::FAILURE;
        }
    };
    logging::info(
        Component::System,
        None,
        &format!("{} stations loaded from {}", catalog.len(), config.catalog_path),
    );

    let backend = match HttpBackend::new(&config.backend.base_url, config.backend.timeout()) {
        Ok(backend) => backend,
        Err(e) => {
            logging::error(Component::System, None, &format!("HTTP client: {}", e));
            return ExitCode::FAILURE;
        }
    };

    let engine = Arc::new(SharedEngine::new(config.animation.clone()));
    let frames = FrameLoop::new(Arc::clone(&engine), config.pipeline.frame_interval()).spawn();

    let orchestrator = Orchestrator::new(
        RequestCoordinator::new(backend, RidershipCache::new(config.pipeline.cache_capacity)),
        engine,
        catalog,
        OrchestratorSettings::from_config(&config),
        FilterSelection::default(),
    );

    logging::info(
        Component::System,
        None,
        &format!("querying {}", config.backend.base_url),
    );

    let mut pending = FuturesUnordered::new();
    pending.push(apply(&orchestrator, FilterDelta::default()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if line == "quit" {
                        break;
                    }
                    match FilterDelta::parse_assignment(line) {
                        Ok(delta) => pending.push(apply(&orchestrator, delta)),
                        Err(e) => println!("! {}", e),
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    logging::error(Component::System, None, &format!("stdin: {}", e));
                    stdin_open = false;
                }
            },
            Some(()) = pending.next(), if !pending.is_empty() => {}
            else => break,
        }
    }

    frames.abort();
    ExitCode::SUCCESS
}

/// Apply one change and report on it.
async fn apply<B: RidershipBackend>(orchestrator: &Orchestrator<B>, delta: FilterDelta) {
    match orchestrator.apply_change(delta).await {
        Ok(ChangeOutcome::Rendered { fetched, loading_shown }) => {
            let selection = orchestrator.selection();
            println!(
                "rendered {} {} hour={} (fetched: {}, loading shown: {}, scale: {:.6})",
                selection.station,
                selection.direction,
                selection.hour,
                fetched,
                loading_shown,
                orchestrator.effective_scale(),
            );
            print_top_stations(orchestrator);
        }
        Ok(ChangeOutcome::Deferred) => println!("deferred until the pending fetch renders"),
        Ok(ChangeOutcome::Superseded) => println!("superseded"),
        Ok(ChangeOutcome::Unchanged) => println!("unchanged"),
        Err(FetchError::ValidationFailure(msg)) => println!("! rejected: {}", msg),
        Err(e) => println!("! {}", e),
    }
}

fn print_top_stations<B: RidershipBackend>(orchestrator: &Orchestrator<B>) {
    let mut heights: Vec<_> = orchestrator.target_heights().into_iter().collect();
    heights.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (id, height) in heights.into_iter().take(TOP_STATIONS) {
        println!("  {:>6}  {:>10.1}", id, height);
    }
}
