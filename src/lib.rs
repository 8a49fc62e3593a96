pub mod auth;
pub mod chat;
pub mod cli;
pub mod error;
pub mod models;
pub mod rooms;
pub mod server;
pub mod store;
pub mod users;

use cli::Args;
use log::info;
use server::{ AppState, Server };
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Store Type: {}", args.store_type);
    info!("Store Host: {}", args.store_host);
    info!("Store Key Prefix: {}", args.store_redis_prefix);
    info!("Users Path: {}", args.users_path.as_deref().unwrap_or("(none)"));
    info!("Outbound Buffer: {}", args.outbound_buffer);
    info!("Max Message Size: {}", args.max_message_size);
    info!("Connections Per Second: {}", args.connections_per_second);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let store = store::initialize_chat_store(&args)?;
    let users = users::create_user_directory(&args)?;
    let state = AppState::new(&args, store, users);
    info!("Credential Verification Configured: {}", state.auth.is_configured());

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
