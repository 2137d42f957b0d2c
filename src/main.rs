use std::sync::Arc;

mod accounts;
mod config;
mod diagnosis;
mod gemini;
mod models;
mod routes;
#[cfg(test)]
mod test_support;

use accounts::AccountStore;
use config::Config;
use diagnosis::DiagnosisRequester;
use gemini::{GeminiClient, ModelClient};
use routes::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let accounts = AccountStore::open(&config.users_file);
    tracing::info!(
        path = %config.users_file.display(),
        accounts = accounts.len(),
        "account store loaded"
    );

    let state = AppState {
        requester: Arc::new(DiagnosisRequester::new(model_client(&config))),
        accounts: Arc::new(accounts),
    };
    let app = routes::router(state, config.max_upload_bytes, config.secure_cookies);

    let listener = tokio::net::TcpListener::bind(config.bind).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

/// Builds the process-wide model client. A missing key or a client that
/// fails to build leaves analysis disabled instead of stopping the server.
fn model_client(config: &Config) -> Option<Arc<dyn ModelClient>> {
    let Some(api_key) = config.api_key.clone() else {
        tracing::warn!("Gemini client not initialized: GEMINI_API_KEY missing");
        return None;
    };
    match GeminiClient::new(api_key, &config.api_base, &config.model) {
        Ok(client) => {
            tracing::info!(model = %config.model, "Gemini client initialized");
            Some(Arc::new(client) as Arc<dyn ModelClient>)
        }
        Err(e) => {
            tracing::error!("could not initialize Gemini client: {}", e);
            None
        }
    }
}
