use rustyactivity::config::ServerConfig;
use rustyactivity::dispatcher::Dispatcher;
use rustyactivity::{AppState, build_app};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rustyactivity=debug,tower_http=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(2);
        }
    };

    let dispatcher = Dispatcher::with_default_codec();
    let app = build_app(AppState::new(dispatcher.clone(), &config));
    tracing::info!(
        max_upload_bytes = config.max_upload_bytes,
        "listening on {}",
        config.addr
    );

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server crashed");

    dispatcher.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
