use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP + WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Secret used to verify bearer credentials (HMAC-SHA256). Without it every
    /// connection is refused with a server error.
    #[arg(long, env = "AUTH_SECRET")]
    pub auth_secret: Option<String>,

    /// Number of outbound events queued per connection before new ones are dropped.
    #[arg(long, env = "OUTBOUND_BUFFER", default_value = "64")]
    pub outbound_buffer: usize,

    /// Largest accepted WebSocket frame, in bytes.
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "65536")]
    pub max_message_size: usize,

    /// Global WebSocket upgrade quota per second.
    #[arg(long, env = "CONNECTIONS_PER_SECOND", default_value = "10")]
    pub connections_per_second: u32,

    // --- Store Args ---
    /// Chat store type (memory, redis)
    #[arg(long, env = "STORE_TYPE", default_value = "memory")]
    pub store_type: String,

    /// Chat store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for Redis chat keys.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "chat:")]
    pub store_redis_prefix: String,

    /// JSON file with the users known to the in-memory user directory.
    #[arg(long, env = "USERS_PATH")]
    pub users_path: Option<String>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4000".to_string(),
            auth_secret: None,
            outbound_buffer: 64,
            max_message_size: 64 * 1024,
            connections_per_second: 10,
            store_type: "memory".to_string(),
            store_host: "redis://127.0.0.1:6379".to_string(),
            store_redis_prefix: "chat:".to_string(),
            users_path: None,
            debug: false,
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_over_defaults() {
        let args = Args::try_parse_from([
            "chatdesk",
            "--store-type",
            "redis",
            "--auth-secret",
            "s3cret",
            "--outbound-buffer",
            "8",
        ]).unwrap();
        assert_eq!(args.store_type, "redis");
        assert_eq!(args.auth_secret.as_deref(), Some("s3cret"));
        assert_eq!(args.outbound_buffer, 8);
        assert_eq!(args.store_redis_prefix, "chat:");
    }
}
