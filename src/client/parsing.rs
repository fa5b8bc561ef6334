//! Parsing of `INFO` text output.
//!
//! INFO replies are `key:value` lines grouped under `# Section` headers. The
//! tool only needs a handful of fields, read through the typed helpers below.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

// Key is word chars or dashes, value is everything after the first colon.
static KV_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^([\w-]+):(.*)$").ok());

/// Parse key-value pairs from INFO command output.
///
/// # Example
/// ```
/// use valkey_trib::client::parsing::parse_info_output;
///
/// let info = "# Cluster\ncluster_enabled:1\n";
/// let parsed = parse_info_output(info);
/// assert_eq!(parsed.get("cluster_enabled"), Some(&"1".to_string()));
/// ```
pub fn parse_info_output(info: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let Some(kv_regex) = KV_REGEX.as_ref() else {
        return result;
    };

    for line in info.lines() {
        let line = line.trim();

        // Skip empty lines and section headers
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = kv_regex.captures(line)
            && let (Some(key), Some(value)) = (caps.get(1), caps.get(2))
        {
            result.insert(key.as_str().to_string(), value.as_str().trim().to_string());
        }
    }

    result
}

/// Cluster related fields from `INFO CLUSTER` and `CLUSTER INFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfoFields {
    /// `cluster_enabled:1` was reported.
    pub cluster_enabled: bool,
    /// Number of nodes this node knows, itself included.
    pub known_nodes: Option<u64>,
}

impl ClusterInfoFields {
    /// Parse from either `INFO CLUSTER` or `CLUSTER INFO` text.
    pub fn parse(info: &str) -> Self {
        let parsed = parse_info_output(info);
        ClusterInfoFields {
            cluster_enabled: parsed.get("cluster_enabled").is_some_and(|v| v == "1"),
            known_nodes: parsed
                .get("cluster_known_nodes")
                .and_then(|v| v.parse().ok()),
        }
    }
}
