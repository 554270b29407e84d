use env_logger::Env;
use log::{error, info};
use std::net::SocketAddr;
use summons_gateway::config::Config;
use summons_gateway::{routes, Gateway};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting summons-gateway");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let gateway = match Gateway::from_config(&config) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Unable to build gateway: {}", e);
            std::process::exit(1);
        }
    };

    // Serving does not wait on this; get_valid_token refreshes lazily anyway.
    let tokens = gateway.tokens.clone();
    tokio::spawn(async move { tokens.warm_up().await });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server_task = tokio::spawn(routes::run(gateway, addr));
    tokio::select! {
        result = server_task => {
            if let Err(e) = result {
                error!("Server task failed: {}", e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Unable to listen for shutdown signal: {}", e);
            }
        }
    }
    info!("Exiting main");
}
