use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::{error, info, warn};

use mcp_sentry_core::broker::inmemory::InMemoryBroker;
use mcp_sentry_core::broker::Broker;
use mcp_sentry_core::config::Config;
use mcp_sentry_core::correlator::Correlator;
use mcp_sentry_core::error::FatalConfigError;
use mcp_sentry_core::ingest::StreamIngestSupervisor;
use mcp_sentry_core::judge::anthropic_provider::AnthropicJudgeProvider;
use mcp_sentry_core::judge::cache::InMemoryCache;
use mcp_sentry_core::judge::{JudgeWorker, Verdict};
use mcp_sentry_core::metrics::{self, Metrics};
use mcp_sentry_core::registry::inmemory::InMemoryRegistry;
use mcp_sentry_core::registry::RegistryPort;
use mcp_sentry_core::rules::{RuleCorpus, RuleEngine, RuleSet};
use mcp_sentry_core::store::inmemory::InMemoryAnalyticStore;
use mcp_sentry_core::store::AnalyticStore;

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(target: "main", "fatal configuration error: {e}");
            std::process::exit(1);
        }
    };

    let rule_engine = Arc::new(load_rule_engine(&config));
    let metrics = Arc::new(Metrics::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let registry: Arc<dyn RegistryPort> = Arc::new(InMemoryRegistry::new());
    let store: Arc<dyn AnalyticStore> = Arc::new(InMemoryAnalyticStore::new());

    let judge_provider = Arc::new(AnthropicJudgeProvider::new(
        config.judge_api_key.clone(),
        config.judge_model.clone(),
    ));
    let judge_cache = Arc::new(InMemoryCache::<Verdict>::new(config.judge_cache_ttl));
    let judge = Arc::new(JudgeWorker::new(
        judge_provider,
        judge_cache,
        config.judge_deadline,
        config.judge_max_parallel,
        metrics.clone(),
    ));

    let supervisor = Arc::new(StreamIngestSupervisor::new(
        broker.clone(),
        rule_engine.clone(),
        metrics.clone(),
        config.worker_parallelism,
    ));
    let correlator = Arc::new(Correlator::new(
        broker.clone(),
        registry.clone(),
        store.clone(),
        judge,
        metrics.clone(),
        config.quiescence,
        config.correlation_ceiling,
    ));

    info!(target: "main", "starting ingest supervisor and correlator");
    let supervisor_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run().await }
    });
    let correlator_handle = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.run().await }
    });

    let health_port = config.health_port;
    let metrics_data = web::Data::new(metrics.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(metrics_data.clone())
            .configure(metrics::configure)
    })
    .bind(("0.0.0.0", health_port))?
    .run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    wait_for_shutdown_signal(rule_engine, &config).await;

    info!(target: "main", "shutdown signal received, draining within {:?}", SHUTDOWN_BUDGET);
    let _ = tokio::time::timeout(SHUTDOWN_BUDGET, async {
        // (a) stop accepting new messages
        supervisor.stop_accepting();
        supervisor_handle.abort();

        // (b) finalise or flush all open correlation groups
        correlator.flush_all().await;

        // (c) drain judge in-flight with a 5s grace, then tear the task down
        tokio::time::sleep(Duration::from_secs(5)).await;
        correlator_handle.abort();

        // (d) close broker connections / the health+metrics listener
        server_handle.stop(true).await;
        let _ = server_task.await;
    })
    .await;

    info!(target: "main", "shutdown complete");
    Ok(())
}

fn load_rule_engine(config: &Config) -> RuleEngine {
    match &config.rules_file {
        Some(path) => match RuleCorpus::load_file(path) {
            Ok(corpus) => {
                info!(target: "main", "loaded {} rules from {}", corpus.rules.len(), path);
                RuleEngine::new(RuleSet::compile(corpus))
            }
            Err(source) => {
                let e = FatalConfigError::RuleCorpus { path: path.clone(), source };
                error!(target: "main", "fatal configuration error: {e}");
                std::process::exit(1);
            }
        },
        None => {
            warn!(target: "main", "no RULES_FILE configured, starting with an empty rule corpus");
            RuleEngine::empty()
        }
    }
}

/// Blocks until SIGTERM/SIGINT request shutdown, hot-reloading the rule
/// corpus on every SIGHUP in the meantime rather than exiting (spec §5).
async fn wait_for_shutdown_signal(rule_engine: Arc<RuleEngine>, config: &Config) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = sigterm.recv() => return,
                _ = sigint.recv() => return,
                _ = sighup.recv() => reload_rules(&rule_engine, config),
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(unix)]
fn reload_rules(rule_engine: &RuleEngine, config: &Config) {
    let Some(path) = &config.rules_file else {
        warn!(target: "main", "SIGHUP received but no RULES_FILE is configured, ignoring");
        return;
    };
    match RuleCorpus::load_file(path) {
        Ok(corpus) => {
            let count = corpus.rules.len();
            rule_engine.reload(corpus);
            info!(target: "main", "reloaded rule corpus from {path} ({count} rules)");
        }
        Err(e) => {
            error!(target: "main", "SIGHUP reload of {path} failed, keeping previous corpus: {e}");
        }
    }
}
