use std::{process::ExitCode, time::Duration};

use kebab_sync::{
    config::Config,
    overpass::HttpInterpreter,
    pipeline::{self, Outcome, SyncError},
    store::PostgrestStore,
    tracing::setup_tracing,
};
use tracing::{error, info};

/// per-request timeout, big areas can take minutes on Overpass
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let _guard = setup_tracing();

    match sync().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn sync() -> Result<Outcome, SyncError> {
    let config = Config::from_env()?;

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let interpreter = HttpInterpreter::new(client.clone());
    let store = PostgrestStore::new(client, &config.store);

    let outcome = pipeline::run(&config.sync, &interpreter, &store).await?;
    if let Outcome::Upserted { rows, batches } = outcome {
        info!(batches, "Done. Upserted {rows} rows for {}.", config.sync.label());
    }

    Ok(outcome)
}
