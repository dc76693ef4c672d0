use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use querent_api::{AuthBackend, DataSourceId, HttpBackend, HttpEngine};
use querent_session::{DataSourceDirectory, DirectQueryRunner, MessageHandler, SessionCache};
use snafu::ResultExt;

mod command;
mod error;
mod logging;
mod repl;
mod settings;

use error::{AppResult, ClientSnafu};
use repl::Repl;
use settings::SettingsStore;

#[derive(Debug, Parser)]
#[command(name = "querent", version)]
#[command(about = "Ask questions about your databases in plain language")]
struct Args {
    /// Settings file to use instead of the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Data source to open on start, overriding `default_data_source`.
    #[arg(long)]
    data_source: Option<DataSourceId>,
    /// Log filter directive, e.g. `debug` or `querent_session=trace`.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let settings = Arc::new(match &args.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    });
    logging::init(args.log.as_deref(), &settings.settings().log_filter);
    settings.report_origin();

    if let Err(error) = run(args, settings).await {
        tracing::error!(error = %error, "querent stopped");
        std::process::exit(1);
    }
}

async fn run(args: Args, settings: Arc<SettingsStore>) -> AppResult<()> {
    let current = settings.settings();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %settings.config_path().display(),
        backend = %current.backend.base_url,
        "querent starting"
    );

    let backend = Arc::new(HttpBackend::new(current.backend_config()).context(ClientSnafu {
        stage: "build-chat-backend",
    })?);
    let engine = Arc::new(HttpEngine::new(current.engine_config()).context(ClientSnafu {
        stage: "build-sql-engine",
    })?);

    let auth: Arc<dyn AuthBackend> = backend.clone();
    let cache = Arc::new(SessionCache::new(backend.clone()));
    tokio::spawn(repl::trace_cache_events(cache.subscribe()));
    let handler = MessageHandler::new(backend.clone(), cache);
    let directory = Arc::new(DataSourceDirectory::new(backend));
    let direct = DirectQueryRunner::new(engine);

    let mut repl = Repl::new(settings.clone(), auth, directory, handler, direct);
    repl.bootstrap(args.data_source.or(current.default_data_source))
        .await;
    repl.run().await
}
