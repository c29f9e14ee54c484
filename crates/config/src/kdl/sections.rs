//! Section-level KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::sections::*;

use super::helpers::{get_string_entry, get_string_list, get_u64_entry, parse_ip};

/// Parse the `acme-client` block
pub fn parse_acme_client(node: &kdl::KdlNode) -> Result<AcmeClientConfig> {
    trace!("Parsing acme-client configuration block");

    let config = AcmeClientConfig {
        binary: get_string_entry(node, "binary")
            .map(PathBuf::from)
            .unwrap_or_else(default_client_binary),
        home: get_string_entry(node, "home")
            .map(PathBuf::from)
            .unwrap_or_else(default_client_home),
        server: match get_string_entry(node, "server") {
            // "none" leaves CA selection to the client
            Some(s) if s == "none" => None,
            Some(s) => Some(s),
            None => default_ca_server(),
        },
        key_type: get_string_entry(node, "key-type").unwrap_or_else(default_key_type),
        timeout_secs: get_u64_entry(node, "timeout-secs")?.unwrap_or_else(default_client_timeout),
        decline_answer: get_string_entry(node, "decline-answer")
            .unwrap_or_else(default_decline_answer),
        proceed_answer: get_string_entry(node, "proceed-answer")
            .unwrap_or_else(default_proceed_answer),
        extra_args: get_string_list(node, "extra-args").unwrap_or_default(),
    };

    trace!(
        binary = %config.binary.display(),
        home = %config.home.display(),
        timeout_secs = config.timeout_secs,
        "Parsed acme-client configuration"
    );

    Ok(config)
}

/// Parse the `dns` block
pub fn parse_dns(node: &kdl::KdlNode) -> Result<DnsConfig> {
    trace!("Parsing dns configuration block");

    let primary = match get_string_entry(node, "primary") {
        Some(s) => parse_ip("primary", &s)?,
        None => default_primary_resolver(),
    };

    let propagation_panel = match get_string_list(node, "propagation-panel") {
        Some(list) => list
            .iter()
            .map(|s| parse_ip("propagation-panel", s))
            .collect::<Result<Vec<_>>>()?,
        None => default_propagation_panel(),
    };

    let max_concurrent_queries = match get_u64_entry(node, "max-concurrent-queries")? {
        Some(v) => v as usize,
        None => default_max_concurrent_queries(),
    };

    let config = DnsConfig {
        primary,
        propagation_panel,
        query_timeout_secs: get_u64_entry(node, "query-timeout-secs")?
            .unwrap_or_else(default_query_timeout),
        propagation_timeout_secs: get_u64_entry(node, "propagation-timeout-secs")?
            .unwrap_or_else(default_propagation_timeout),
        max_concurrent_queries,
    };

    trace!(
        primary = %config.primary,
        panel_size = config.propagation_panel.len(),
        "Parsed dns configuration"
    );

    Ok(config)
}

/// Parse the `store` block
pub fn parse_store(node: &kdl::KdlNode) -> Result<StoreConfig> {
    Ok(StoreConfig {
        path: get_string_entry(node, "path")
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path),
    })
}

/// Parse the `edge` block
pub fn parse_edge(node: &kdl::KdlNode) -> Result<EdgeConfig> {
    trace!("Parsing edge configuration block");

    let control_endpoint = match get_string_entry(node, "control-endpoint") {
        Some(s) if s == "none" => None,
        Some(s) => Some(s),
        None => default_control_endpoint(),
    };

    let config = EdgeConfig {
        master_config: get_string_entry(node, "master-config")
            .map(PathBuf::from)
            .unwrap_or_else(default_master_config),
        fragment_dir: get_string_entry(node, "fragment-dir")
            .map(PathBuf::from)
            .unwrap_or_else(default_fragment_dir),
        import_directive: get_string_entry(node, "import-directive")
            .unwrap_or_else(default_import_directive),
        fragment_template: get_string_entry(node, "fragment-template")
            .unwrap_or_else(default_fragment_template),
        reload_command: get_string_list(node, "reload-command")
            .unwrap_or_else(default_reload_command),
        control_endpoint,
        control_content_type: get_string_entry(node, "control-content-type")
            .unwrap_or_else(default_control_content_type),
        reload_timeout_secs: get_u64_entry(node, "reload-timeout-secs")?
            .unwrap_or_else(default_reload_timeout),
    };

    trace!(
        master_config = %config.master_config.display(),
        fragment_dir = %config.fragment_dir.display(),
        has_control_endpoint = config.control_endpoint.is_some(),
        "Parsed edge configuration"
    );

    Ok(config)
}

/// Parse the `session` block
pub fn parse_session(node: &kdl::KdlNode) -> Result<SessionConfig> {
    Ok(SessionConfig {
        ttl_secs: get_u64_entry(node, "ttl-secs")?.unwrap_or_else(default_session_ttl),
    })
}
