use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use timelapse_bus::{PoolSizes, SkipFilter};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    bind: String,
    output_dir: PathBuf,
    commit_list_dir: PathBuf,
    canvas: String,
    pool_sizes: PoolSizes,
    queue_capacity: usize,
    stats_interval: Duration,
    skip_every: Option<NonZeroUsize>,
    authors: Vec<String>,
    render_dates: bool,
    keep_downloads: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5555".to_string(),
            output_dir: PathBuf::from("output"),
            commit_list_dir: PathBuf::from("."),
            canvas: "canvas1".to_string(),
            pool_sizes: PoolSizes::default(),
            queue_capacity: 256,
            stats_interval: Duration::from_millis(1000),
            skip_every: None,
            authors: vec!["root".to_string(), "nebulus".to_string()],
            render_dates: true,
            keep_downloads: true,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}

impl GeneratorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let authors = lookup("TIMELAPSE_AUTHORS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.authors);

        Self {
            bind: lookup("TIMELAPSE_BIND").unwrap_or(defaults.bind),
            output_dir: lookup("TIMELAPSE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            commit_list_dir: lookup("TIMELAPSE_COMMIT_LIST_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.commit_list_dir),
            canvas: lookup("TIMELAPSE_CANVAS").unwrap_or(defaults.canvas),
            pool_sizes: PoolSizes {
                download: parsed(&lookup, "TIMELAPSE_DOWNLOAD_WORKERS", defaults.pool_sizes.download),
                render: parsed(&lookup, "TIMELAPSE_RENDER_WORKERS", defaults.pool_sizes.render),
                save: parsed(&lookup, "TIMELAPSE_SAVE_WORKERS", defaults.pool_sizes.save),
            },
            queue_capacity: parsed(&lookup, "TIMELAPSE_QUEUE_CAPACITY", defaults.queue_capacity),
            stats_interval: Duration::from_millis(parsed(
                &lookup,
                "TIMELAPSE_STATS_INTERVAL_MS",
                1000u64,
            )),
            skip_every: NonZeroUsize::new(parsed(&lookup, "TIMELAPSE_SKIP_EVERY", 0usize)),
            authors,
            render_dates: parsed(&lookup, "TIMELAPSE_RENDER_DATES", defaults.render_dates),
            keep_downloads: parsed(&lookup, "TIMELAPSE_KEEP_DOWNLOADS", defaults.keep_downloads),
        }
    }

    pub fn bind(&self) -> &str {
        &self.bind
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Commit lists named by `Start` commands are only looked up below this.
    pub fn commit_list_dir(&self) -> &Path {
        &self.commit_list_dir
    }

    pub fn canvas(&self) -> &str {
        &self.canvas
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        self.pool_sizes
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }

    pub fn skip(&self) -> SkipFilter {
        SkipFilter::every(self.skip_every.map_or(0, NonZeroUsize::get))
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn render_dates(&self) -> bool {
        self.render_dates
    }

    pub fn keep_downloads(&self) -> bool {
        self.keep_downloads
    }

    #[cfg(test)]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    #[cfg(test)]
    pub fn with_commit_list_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.commit_list_dir = dir.into();
        self
    }
}

pub fn config() -> &'static GeneratorConfig {
    static CONFIG: LazyLock<GeneratorConfig> = LazyLock::new(GeneratorConfig::from_env);
    &CONFIG
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("TIMELAPSE_RENDER_WORKERS", "6"),
            ("TIMELAPSE_SKIP_EVERY", "6"),
            ("TIMELAPSE_AUTHORS", "root, alice ,"),
            ("TIMELAPSE_RENDER_DATES", "false"),
            ("TIMELAPSE_QUEUE_CAPACITY", "lots"),
            ("TIMELAPSE_COMMIT_LIST_DIR", "/srv/commits"),
        ]);
        let config = GeneratorConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.pool_sizes().render, 6);
        assert_eq!(config.pool_sizes().download, 4);
        assert!(!config.skip().keep(12));
        assert_eq!(config.authors(), ["root".to_string(), "alice".to_string()]);
        assert!(!config.render_dates());
        assert!(config.keep_downloads());
        // unparsable values keep the default
        assert_eq!(config.queue_capacity(), 256);
        assert_eq!(config.bind(), "0.0.0.0:5555");
        assert_eq!(config.commit_list_dir(), Path::new("/srv/commits"));
    }
}
