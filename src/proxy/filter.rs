// ABOUTME: ToolFilter - decides which upstream tools a proxy unit republishes.
// ABOUTME: Built from the allow/block config; unknown modes fail open.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::{ToolFilterConfig, ToolFilterMode};
use crate::mcp::McpToolInfo;

/// A resolved tool filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFilter {
    PassAll,
    Allow(HashSet<String>),
    Block(HashSet<String>),
}

impl ToolFilter {
    /// Resolve the filter for the upstream `upstream`.
    ///
    /// An empty list disables filtering whatever the mode. An unrecognized
    /// mode also disables it and logs a warning.
    pub fn from_config(upstream: &str, config: Option<&ToolFilterConfig>) -> Self {
        let Some(config) = config else {
            return ToolFilter::PassAll;
        };
        if config.list.is_empty() {
            return ToolFilter::PassAll;
        }

        let names: HashSet<String> = config.list.iter().cloned().collect();
        match config.parsed_mode() {
            Some(ToolFilterMode::Allow) => ToolFilter::Allow(names),
            Some(ToolFilterMode::Block) => ToolFilter::Block(names),
            None => {
                warn!(
                    upstream = %upstream,
                    mode = %config.mode,
                    "Unknown tool filter mode, skipping filter"
                );
                ToolFilter::PassAll
            }
        }
    }

    pub fn permits(&self, tool: &str) -> bool {
        match self {
            ToolFilter::PassAll => true,
            ToolFilter::Allow(names) => names.contains(tool),
            ToolFilter::Block(names) => !names.contains(tool),
        }
    }

    /// Split `tools` into the ones to register and the names dropped.
    pub fn apply(&self, upstream: &str, tools: Vec<McpToolInfo>) -> (Vec<McpToolInfo>, Vec<String>) {
        let (kept, dropped): (Vec<_>, Vec<_>) =
            tools.into_iter().partition(|t| self.permits(&t.name));
        let dropped: Vec<String> = dropped.into_iter().map(|t| t.name).collect();
        for name in &dropped {
            info!(upstream = %upstream, tool = %name, "Filtered out tool");
        }
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> Vec<McpToolInfo> {
        names.iter().map(|n| McpToolInfo::new(*n, "")).collect()
    }

    fn kept(filter: &ToolFilter, names: &[&str]) -> HashSet<String> {
        let (kept, _) = filter.apply("test", tools(names));
        kept.into_iter().map(|t| t.name).collect()
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    const ALL: &[&str] = &["read", "write", "delete"];

    #[test]
    fn test_no_filter_passes_all() {
        let filter = ToolFilter::from_config("test", None);
        assert_eq!(filter, ToolFilter::PassAll);
        assert_eq!(kept(&filter, ALL), set(ALL));
    }

    #[test]
    fn test_allow_is_intersection() {
        let filter = ToolFilter::from_config("test", Some(&ToolFilterConfig::allow(["read", "nope"])));
        assert_eq!(kept(&filter, ALL), set(&["read"]));
    }

    #[test]
    fn test_block_is_difference() {
        let filter = ToolFilter::from_config("test", Some(&ToolFilterConfig::block(["delete"])));
        let (kept, dropped) = filter.apply("test", tools(ALL));
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, vec!["delete".to_string()]);
    }

    #[test]
    fn test_empty_list_disables_filtering() {
        let allow = ToolFilter::from_config("test", Some(&ToolFilterConfig::allow(Vec::<String>::new())));
        let block = ToolFilter::from_config("test", Some(&ToolFilterConfig::block(Vec::<String>::new())));
        assert_eq!(kept(&allow, ALL), set(ALL));
        assert_eq!(kept(&block, ALL), set(ALL));
    }

    #[test]
    fn test_disjoint_list() {
        let allow = ToolFilter::from_config("test", Some(&ToolFilterConfig::allow(["x", "y"])));
        let block = ToolFilter::from_config("test", Some(&ToolFilterConfig::block(["x", "y"])));
        assert!(kept(&allow, ALL).is_empty());
        assert_eq!(kept(&block, ALL), set(ALL));
    }

    #[test]
    fn test_superset_list() {
        let list = ["read", "write", "delete", "extra"];
        let allow = ToolFilter::from_config("test", Some(&ToolFilterConfig::allow(list)));
        let block = ToolFilter::from_config("test", Some(&ToolFilterConfig::block(list)));
        assert_eq!(kept(&allow, ALL), set(ALL));
        assert!(kept(&block, ALL).is_empty());
    }

    #[test]
    fn test_mode_is_case_insensitive() {
        let config = ToolFilterConfig {
            mode: "BLOCK".into(),
            list: vec!["read".into()],
        };
        let filter = ToolFilter::from_config("test", Some(&config));
        assert!(matches!(filter, ToolFilter::Block(_)));
    }

    #[test]
    fn test_unknown_mode_fails_open() {
        let config = ToolFilterConfig {
            mode: "maybe".into(),
            list: vec!["read".into()],
        };
        let filter = ToolFilter::from_config("test", Some(&config));
        assert_eq!(filter, ToolFilter::PassAll);
        assert_eq!(kept(&filter, ALL), set(ALL));
    }
}
