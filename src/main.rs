use timelapse_bus::{EventBus, Orchestrator, PipelineState};
use tokio_util::sync::CancellationToken;

mod api;
mod commits;
mod config;
mod dispatcher;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let orchestrator = Orchestrator::new(EventBus::default());
    let dispatcher = dispatcher::Dispatcher::new(orchestrator.clone(), config.clone());
    let cancel = CancellationToken::new();

    dispatcher.start_event_loop(cancel.clone());
    api::start_api_server(config.bind().to_string(), dispatcher, cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    if orchestrator.state() != PipelineState::Idle {
        log::info!("waiting for the pipeline to drain");
        if let Err(e) = orchestrator.stop().await {
            log::warn!("stop failed: {}", e);
        }
    }
    std::process::exit(0);
}
