use std::path::PathBuf;

/// Configuration for an emberdb instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the per-shard data files (default: current directory)
    pub dir: PathBuf,

    /// Shards per storage tier (default: one per available core)
    pub shards: usize,

    /// Cache records per cache shard (default: 20)
    pub cache_capacity: usize,

    /// HTTP listen port (default: 10000)
    pub port: u16,

    /// Open shard files with O_DIRECT (default: false)
    pub direct_io: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            shards: std::thread::available_parallelism().map_or(1, |n| n.get()),
            cache_capacity: 20,
            port: 10000,
            direct_io: false,
        }
    }
}

impl Config {
    /// Create a new config with the given data directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the number of shards per tier
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the per-shard cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the HTTP listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable direct I/O on the shard files
    pub fn direct_io(mut self, enabled: bool) -> Self {
        self.direct_io = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dir, PathBuf::from("."));
        assert!(config.shards >= 1);
        assert_eq!(config.cache_capacity, 20);
        assert_eq!(config.port, 10000);
        assert!(!config.direct_io);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test")
            .shards(4)
            .cache_capacity(2)
            .port(8080)
            .direct_io(true);

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.shards, 4);
        assert_eq!(config.cache_capacity, 2);
        assert_eq!(config.port, 8080);
        assert!(config.direct_io);
    }
}
