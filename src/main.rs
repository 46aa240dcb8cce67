use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use agri_market::auth::TokenCipher;
use agri_market::config::Config;
use agri_market::models::UserId;
use agri_market::routes::routes;
use agri_market::seed::Seed;
use agri_market::server::Server;
use agri_market::store::MemoryStore;
use chrono::Duration;
use log::{error, info, warn};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};

/// Checks that the certificate chain and key parse and match before warp
/// is handed the paths.
fn load_tls_config(cert_path: &Path, key_path: &Path) -> Option<ServerConfig> {
    let cert_file = match File::open(cert_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open certificate file: {e}");
            return None;
        }
    };
    let key_file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open private key file: {e}");
            return None;
        }
    };

    let cert_reader = &mut BufReader::new(cert_file);
    let key_reader = &mut BufReader::new(key_file);

    let chain = match certs(cert_reader).collect::<Result<Vec<_>, _>>() {
        Ok(chain) if !chain.is_empty() => chain,
        Ok(_) => {
            warn!("No certificates found in {}", cert_path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to parse certificate: {e}");
            return None;
        }
    };

    let key = match private_key(key_reader) {
        Ok(Some(key)) => key,
        Ok(None) => {
            warn!("No private key found in {}", key_path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to parse private key: {e}");
            return None;
        }
    };

    match ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
    {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Failed to create TLS config: {e}");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // `agri_market issue-token <user-id>` prints a bearer token and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, user] = args.as_slice() {
        if command == "issue-token" {
            let cipher = TokenCipher::from_secret(&config.token_secret);
            match cipher.issue(&UserId::from(user.as_str()), Duration::seconds(config.token_ttl_secs)) {
                Ok(token) => println!("{token}"),
                Err(e) => {
                    error!("{e}");
                    std::process::exit(1);
                }
            }
            return;
        }
    }

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.seed_path {
        let seeded = match Seed::from_file(path).await {
            Ok(seed) => seed.apply(store.as_ref()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = seeded {
            error!("{e}");
            std::process::exit(1);
        }
    }

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let tls = config
        .tls_paths()
        .filter(|(cert, key)| load_tls_config(cert, key).is_some())
        .map(|(cert, key)| (cert.clone(), key.clone()));

    let server = Arc::new(Server::new(config, store));
    let routes = routes(server);

    match tls {
        Some((cert, key)) => {
            let (bound, serving) = warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .bind_with_graceful_shutdown(addr, shutdown_signal());
            info!("Starting secure server (HTTPS/WSS) on {bound}");
            serving.await;
        }
        None => {
            warn!("TLS not configured, serving HTTP/WS");
            match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
                Ok((bound, serving)) => {
                    info!("Server starting on {bound}");
                    serving.await;
                }
                Err(e) => {
                    error!("Failed to bind to {addr}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("Server shut down");
}
