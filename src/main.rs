use pazik::{build_router, create_pool, ensure_schema, AppState, Config};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    fmt().with_env_filter(filter).init();

    let config = Config::load().expect("Environment misconfigured!");
    info!(?config, "Loaded configuration");

    let pool = create_pool(&config.database_url).expect("Failed to create pool.");
    {
        let mut conn = pool.get().expect("Failed to get a connection.");
        ensure_schema(&mut conn).expect("Failed to create schema.");
    }

    let address = config.bind_addr.clone();
    let app = build_router(AppState::new(pool, config));

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .expect("Failed to bind listener.");
    info!("listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error.");

    // The pool, and every connection in it, is dropped with the router.
    info!("Server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
