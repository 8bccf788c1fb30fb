use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use journalctl_proxy::{
    build_app, config::Config, journal::tail::ensure_program_available, logging,
    services::CliServiceCatalog, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    logging::init_logging(&config.log_filter);
    config.validate()?;

    let journal = config.journal_settings();
    ensure_program_available(&journal.program).await?;

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(
        config.credentials(),
        Arc::new(CliServiceCatalog::default()),
        journal,
    );
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        basic_auth = config.credentials().is_some(),
        user_scope = config.user,
        docker = config.docker,
        "server starting"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
