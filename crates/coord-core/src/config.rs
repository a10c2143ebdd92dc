//! Coordinator configuration (§6). Loading it from a file or environment is
//! out of scope here -- this is the destination struct, populated however
//! the embedding process likes.

/// Tunables for a single coordinator process.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Coordination-service connection string (e.g. a ZooKeeper ensemble).
    pub connection_string: String,
    /// Path prefix all znodes are created under.
    pub namespace: String,
    /// Number of key-space segments. Bounds watch fan-out.
    pub segments: u32,
    /// When `true`, the current leader is excluded from partition
    /// assignment candidates (it still counts as a cluster member).
    pub spare_leader: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            namespace: String::new(),
            segments: 128,
            spare_leader: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.segments, 128);
        assert!(!config.spare_leader);
    }
}
