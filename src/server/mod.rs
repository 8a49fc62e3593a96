pub mod api;
pub mod websocket;

use crate::auth::Authenticator;
use crate::chat::{ ChatService, Dispatcher };
use crate::cli::Args;
use crate::rooms::RoomRegistry;
use crate::store::ChatStore;
use crate::users::UserDirectory;

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::Router;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::{ info, error };
use tokio::net::TcpListener;

pub type ConnectionLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone, Copy, Debug)]
pub struct SocketSettings {
    pub outbound_buffer: usize,
    pub max_message_size: usize,
}

/// Everything a request or socket task needs. Cloned per request; all
/// shared parts sit behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub dispatcher: Dispatcher,
    pub rooms: Arc<RoomRegistry>,
    pub auth: Authenticator,
    pub limiter: Arc<ConnectionLimiter>,
    pub socket: SocketSettings,
}

impl AppState {
    pub fn new(args: &Args, store: Arc<dyn ChatStore>, users: Arc<dyn UserDirectory>) -> Self {
        let chat = Arc::new(ChatService::new(store, users.clone()));
        let rooms = Arc::new(RoomRegistry::new());
        let dispatcher = Dispatcher::new(rooms.clone(), chat.clone());
        let per_second = NonZeroU32::new(args.connections_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            chat,
            dispatcher,
            rooms,
            auth: Authenticator::new(args.auth_secret.as_deref(), users),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            socket: SocketSettings {
                outbound_buffer: args.outbound_buffer.max(1),
                max_message_size: args.max_message_size,
            },
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    api::routes(state)
}

/// Serves HTTP and WebSocket traffic on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), Box<dyn Error + Send + Sync>> {
    let app = build_router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;

        if self.args.enable_tls {
            let (cert_path, key_path) = match (&self.args.tls_cert_path, &self.args.tls_key_path) {
                (Some(cert), Some(key)) => (cert, key),
                (Some(_), None) | (None, Some(_)) => {
                    error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                    return Err("Missing TLS certificate or key path".into());
                }
                (None, None) => {
                    error!("--enable-tls was set but no certificate/key paths provided.");
                    return Err("TLS enabled without cert/key".into());
                }
            };
            info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
            let tls_config = axum_server::tls_rustls::RustlsConfig
                ::from_pem_file(cert_path, key_path).await?;

            info!("HTTPS/WSS server listening on: {}", addr);
            let app = build_router(self.state.clone());
            axum_server
                ::bind_rustls(addr, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        } else {
            info!("TLS not enabled. Running plain HTTP/WS server.");
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                format!("Failed to bind server to {}: {}. Try a different port.", addr, e)
            })?;
            info!("HTTP/WS server listening on: {}", addr);
            serve(listener, self.state.clone()).await?;
        }

        Ok(())
    }
}
