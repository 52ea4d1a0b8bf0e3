//! Server configuration: YAML document plus command-line overrides.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level server configuration, sourced from a YAML document.
///
/// Every field has a default, so an empty document (or no document at all)
/// yields a valid configuration with all adapters disabled. A partially
/// specified adapter section keeps that adapter's defaults for the fields it
/// leaves out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name used in startup logging.
    pub server_name: String,

    /// Default tracing filter directive, used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Directory holding one subdirectory per topic.
    pub data_directory: PathBuf,

    /// Worker threads for the runtime; 0 means auto-detect hardware
    /// parallelism.
    pub thread_pool_size: usize,

    /// Length-prefixed binary protocol listener.
    pub tcp_server: TcpConfig,

    /// REST + SSE listener.
    pub http_server: HttpConfig,

    /// WebSocket JSON-frame listener.
    pub websocket_server: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "eventlog".to_string(),
            log_level: "info".to_string(),
            data_directory: PathBuf::from("./eventlog-data"),
            thread_pool_size: 0,
            tcp_server: TcpConfig::default(),
            http_server: HttpConfig::default(),
            websocket_server: WebSocketConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a configuration document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::InvalidInput(format!("invalid config file {}: {e}", path.display())))
    }

    /// Worker thread count for the runtime, resolving 0 to the machine's
    /// available parallelism.
    pub fn worker_threads(&self) -> usize {
        if self.thread_pool_size > 0 {
            return self.thread_pool_size;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid listen host: {host}")))?;
    Ok(SocketAddr::new(ip, port))
}

/// Binary protocol listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: 12345,
        }
    }
}

impl TcpConfig {
    /// The socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve_addr(&self.host, self.port)
    }
}

/// HTTP listener settings. The TLS paths are recognized so configurations
/// carrying them keep working, but termination is expected in front of the
/// server; when set they are logged and the listener still serves plain
/// HTTP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub ssl_cert_path: Option<PathBuf>,
    pub ssl_key_path: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: 8080,
            ssl_cert_path: None,
            ssl_key_path: None,
        }
    }
}

impl HttpConfig {
    /// The socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve_addr(&self.host, self.port)
    }
}

/// WebSocket listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: 9090,
        }
    }
}

impl WebSocketConfig {
    /// The socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve_addr(&self.host, self.port)
    }
}

/// Command-line arguments. Flags override the YAML document; a port
/// override also enables the corresponding adapter.
#[derive(Debug, Parser)]
#[command(name = "eventlog", about = "Persistent topic-partitioned event queue server")]
pub struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Override the binary protocol port (implies enabling it).
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// Override the HTTP port (implies enabling it).
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Override the WebSocket port (implies enabling it).
    #[arg(long)]
    pub ws_port: Option<u16>,
}

impl CliArgs {
    /// Resolves the effective configuration: the YAML document (defaults
    /// when the file is absent) with this invocation's overrides applied.
    ///
    /// Runs before tracing is initialized (the log filter comes out of the
    /// config), so it stays silent; the caller reports the config source.
    pub fn into_config(self) -> Result<ServerConfig> {
        let mut config = if self.config.exists() {
            ServerConfig::load(&self.config)?
        } else {
            ServerConfig::default()
        };

        if let Some(data_dir) = self.data_dir {
            config.data_directory = data_dir;
        }
        if let Some(port) = self.tcp_port {
            config.tcp_server.port = port;
            config.tcp_server.enabled = true;
        }
        if let Some(port) = self.http_port {
            config.http_server.port = port;
            config.http_server.enabled = true;
        }
        if let Some(port) = self.ws_port {
            config.websocket_server.port = port;
            config.websocket_server.enabled = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_all_adapters_disabled() {
        // given/when
        let config = ServerConfig::default();

        // then
        assert!(!config.tcp_server.enabled);
        assert!(!config.http_server.enabled);
        assert!(!config.websocket_server.enabled);
        assert_eq!(config.tcp_server.port, 12345);
        assert_eq!(config.http_server.port, 8080);
        assert_eq!(config.websocket_server.port, 9090);
    }

    #[test]
    fn should_deserialize_a_full_document() {
        // given
        let yaml = r#"
server_name: queue-1
data_directory: /var/lib/eventlog
thread_pool_size: 4
tcp_server:
  enabled: true
  host: 127.0.0.1
  port: 15000
http_server:
  enabled: true
  port: 8081
  ssl_cert_path: /etc/tls/cert.pem
  ssl_key_path: /etc/tls/key.pem
websocket_server:
  enabled: true
"#;

        // when
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();

        // then
        assert_eq!(config.server_name, "queue-1");
        assert_eq!(config.data_directory, PathBuf::from("/var/lib/eventlog"));
        assert_eq!(config.thread_pool_size, 4);
        assert!(config.tcp_server.enabled);
        assert_eq!(config.tcp_server.host, "127.0.0.1");
        assert_eq!(config.tcp_server.port, 15000);
        assert!(config.http_server.enabled);
        assert_eq!(config.http_server.port, 8081);
        assert!(config.http_server.ssl_cert_path.is_some());
        // A partially specified section keeps its own defaults.
        assert!(config.websocket_server.enabled);
        assert_eq!(config.websocket_server.port, 9090);
        assert_eq!(config.websocket_server.host, "0.0.0.0");
    }

    #[test]
    fn should_accept_an_empty_document() {
        // given
        let yaml = "{}";

        // when
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();

        // then
        assert_eq!(config.server_name, "eventlog");
        assert!(!config.http_server.enabled);
    }

    #[test]
    fn should_enable_adapters_on_port_override() {
        // given
        let args = CliArgs {
            config: PathBuf::from("/nonexistent/config.yaml"),
            data_dir: Some(PathBuf::from("/tmp/q")),
            tcp_port: Some(7001),
            http_port: None,
            ws_port: Some(7003),
        };

        // when
        let config = args.into_config().unwrap();

        // then
        assert_eq!(config.data_directory, PathBuf::from("/tmp/q"));
        assert!(config.tcp_server.enabled);
        assert_eq!(config.tcp_server.port, 7001);
        assert!(!config.http_server.enabled);
        assert!(config.websocket_server.enabled);
        assert_eq!(config.websocket_server.port, 7003);
    }

    #[test]
    fn should_resolve_socket_addresses() {
        // given
        let adapter = TcpConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 9999,
        };

        // when
        let addr = adapter.socket_addr().unwrap();

        // then
        assert_eq!(addr.to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn should_reject_an_unparseable_host() {
        // given
        let adapter = WebSocketConfig {
            enabled: true,
            host: "not a host".to_string(),
            port: 1,
        };

        // when/then
        assert!(adapter.socket_addr().is_err());
    }
}
