use anyhow::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use csv_top_values::{config, logging, routes, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::load_config()?;

    // Build our application state
    let state = Arc::new(AppState::new(config));
    let addr = state.config.bind_addr;

    // Build our application with a route
    let app = routes::analysis::routes()
        .with_state(state)
        .merge(routes::routes())
        .layer(TraceLayer::new_for_http());

    // Run it
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
