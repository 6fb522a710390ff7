use std::net::SocketAddr;
use tracing::info;

use crate::config::AppConfig;
use crate::server::Server;

pub async fn handle(config: AppConfig, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    info!("Starting directsql in {:?} mode", config.environment);

    // Allow tests or deployments to override port via env
    let addr = bind.unwrap_or_else(|| {
        let port = std::env::var("DIRECTSQL_PORT")
            .ok()
            .or_else(|| std::env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3000);
        SocketAddr::from(([0, 0, 0, 0], port))
    });

    let server = Server::build(&config).await?;
    server.run(addr, &config).await
}
