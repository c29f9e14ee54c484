//! Configuration sections and their defaults.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// External ACME Client
// ============================================================================

/// How to drive the external ACME client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeClientConfig {
    /// Client executable (absolute path or name on `PATH`)
    #[serde(default = "default_client_binary")]
    pub binary: PathBuf,

    /// Client home; per-domain output directories live here
    #[serde(default = "default_client_home")]
    pub home: PathBuf,

    /// CA selector passed to the client
    #[serde(default = "default_ca_server")]
    pub server: Option<String>,

    #[serde(default = "default_key_type")]
    pub key_type: String,

    /// Upper bound for one client invocation
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,

    /// Answer fed to the confirmation prompt when only declaring challenges
    #[serde(default = "default_decline_answer")]
    pub decline_answer: String,

    /// Answer fed to the confirmation prompt when issuing
    #[serde(default = "default_proceed_answer")]
    pub proceed_answer: String,

    /// Appended to every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl AcmeClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AcmeClientConfig {
    fn default() -> Self {
        Self {
            binary: default_client_binary(),
            home: default_client_home(),
            server: default_ca_server(),
            key_type: default_key_type(),
            timeout_secs: default_client_timeout(),
            decline_answer: default_decline_answer(),
            proceed_answer: default_proceed_answer(),
            extra_args: Vec::new(),
        }
    }
}

pub fn default_client_binary() -> PathBuf {
    PathBuf::from("/root/.acme.sh/acme.sh")
}

pub fn default_client_home() -> PathBuf {
    PathBuf::from("/root/.acme.sh")
}

pub fn default_ca_server() -> Option<String> {
    Some("letsencrypt".to_string())
}

pub fn default_key_type() -> String {
    "ec-256".to_string()
}

pub fn default_client_timeout() -> u64 {
    300
}

pub fn default_decline_answer() -> String {
    "n".to_string()
}

pub fn default_proceed_answer() -> String {
    "y".to_string()
}

// ============================================================================
// DNS
// ============================================================================

/// Resolvers used for verification and propagation sampling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Resolver whose answer gates issuance
    #[serde(default = "default_primary_resolver")]
    pub primary: IpAddr,

    /// Independent public resolvers sampled for progress display
    #[serde(default = "default_propagation_panel")]
    pub propagation_panel: Vec<IpAddr>,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Overall deadline for one propagation sample
    #[serde(default = "default_propagation_timeout")]
    pub propagation_timeout_secs: u64,

    /// Resolvers queried at once during propagation sampling
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,
}

impl DnsConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_secs(self.propagation_timeout_secs)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_resolver(),
            propagation_panel: default_propagation_panel(),
            query_timeout_secs: default_query_timeout(),
            propagation_timeout_secs: default_propagation_timeout(),
            max_concurrent_queries: default_max_concurrent_queries(),
        }
    }
}

pub fn default_primary_resolver() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))
}

pub fn default_propagation_panel() -> Vec<IpAddr> {
    vec![
        IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),       // Google
        IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),       // Cloudflare
        IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),       // Quad9
        IpAddr::V4(Ipv4Addr::new(208, 67, 222, 222)), // OpenDNS
    ]
}

pub fn default_query_timeout() -> u64 {
    5
}

pub fn default_propagation_timeout() -> u64 {
    15
}

pub fn default_max_concurrent_queries() -> usize {
    4
}

// ============================================================================
// Certificate Store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of `<domain>/{cert,key,chain}.pem`
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

pub fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/wildcert/certs")
}

// ============================================================================
// Edge Server
// ============================================================================

/// Edge server config tree and reload controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default = "default_master_config")]
    pub master_config: PathBuf,

    /// One generated fragment per domain lives here
    #[serde(default = "default_fragment_dir")]
    pub fragment_dir: PathBuf,

    /// Inclusion line for the master config; `{dir}` is the fragment dir
    #[serde(default = "default_import_directive")]
    pub import_directive: String,

    /// Placeholders: `{names}` (comma-separated site addresses), `{domain}`,
    /// `{wildcard}`, `{cert}`, `{key}`, `{chain}`
    #[serde(default = "default_fragment_template")]
    pub fragment_template: String,

    /// Primary reload path; empty disables it
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,

    /// Fallback reload path; receives the master config as payload
    #[serde(default = "default_control_endpoint")]
    pub control_endpoint: Option<String>,

    #[serde(default = "default_control_content_type")]
    pub control_content_type: String,

    #[serde(default = "default_reload_timeout")]
    pub reload_timeout_secs: u64,
}

impl EdgeConfig {
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            master_config: default_master_config(),
            fragment_dir: default_fragment_dir(),
            import_directive: default_import_directive(),
            fragment_template: default_fragment_template(),
            reload_command: default_reload_command(),
            control_endpoint: default_control_endpoint(),
            control_content_type: default_control_content_type(),
            reload_timeout_secs: default_reload_timeout(),
        }
    }
}

pub fn default_master_config() -> PathBuf {
    PathBuf::from("/etc/caddy/Caddyfile")
}

pub fn default_fragment_dir() -> PathBuf {
    PathBuf::from("/etc/caddy/sites")
}

pub fn default_import_directive() -> String {
    "import {dir}/*".to_string()
}

pub fn default_fragment_template() -> String {
    concat!(
        "# Managed by wildcert; regenerated on every sync.\n",
        "{names} {\n",
        "\ttls {cert} {key}\n",
        "}\n"
    )
    .to_string()
}

pub fn default_reload_command() -> Vec<String> {
    vec![
        "caddy".to_string(),
        "reload".to_string(),
        "--config".to_string(),
        "/etc/caddy/Caddyfile".to_string(),
    ]
}

pub fn default_control_endpoint() -> Option<String> {
    Some("http://localhost:2019/load".to_string())
}

pub fn default_control_content_type() -> String {
    "text/caddyfile".to_string()
}

pub fn default_reload_timeout() -> u64 {
    30
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions older than this are discarded when next touched
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
        }
    }
}

pub fn default_session_ttl() -> u64 {
    3600
}
