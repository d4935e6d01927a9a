use std::net::SocketAddr;
use std::sync::Arc;

use parlor::{app, auth::LoginAudit, chat::FanoutEngine, config::Config, AppState};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=info".parse().unwrap()),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let state = AppState {
        engine: Arc::new(FanoutEngine::new(config.history_cap, config.max_message_len)),
        audit: Arc::new(LoginAudit::default()),
        config: config.clone(),
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!(%addr, "parlor listening");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
