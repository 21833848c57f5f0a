pub mod fake_graph;
pub mod fake_turnstile;

use axum::Router;
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::sync::Once;
use tokio::net::TcpListener;

static LOGGING: Once = Once::new();

pub fn setup_logging() {
    LOGGING.call_once(|| {
        let _ = CombinedLogger::init(vec![TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )]);
    });
}

/// Serves `app` on an ephemeral loopback port and returns its base URL.
pub(crate) async fn serve_on_ephemeral_port(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            log::error!("Fake server stopped: {error}");
        }
    });
    format!("http://{address}")
}
