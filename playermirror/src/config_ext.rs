//! Mirror settings read from `mirrorconfig`.

use std::time::Duration;

use mirrorconfig::Config;
use tracing::warn;

use crate::adapter::SentinelFallback;

/// Resolved engine settings.
///
/// `None` fields keep the adapter's own choice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorSettings {
    pub poll_interval: Option<Duration>,
    pub min_reload_interval: Duration,
    pub reload_workers: usize,
    pub sentinel_fallback: Option<SentinelFallback>,
    pub log_level: String,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            poll_interval: None,
            min_reload_interval: Duration::from_millis(1000),
            reload_workers: 2,
            sentinel_fallback: None,
            log_level: "INFO".to_string(),
        }
    }
}

impl MirrorSettings {
    pub fn with_min_reload_interval(mut self, interval: Duration) -> Self {
        self.min_reload_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_reload_workers(mut self, workers: usize) -> Self {
        self.reload_workers = workers;
        self
    }

    pub fn with_sentinel_fallback(mut self, fallback: SentinelFallback) -> Self {
        self.sentinel_fallback = Some(fallback);
        self
    }
}

/// Parses `adapter`, `none` or `first_entry_of_active_playlist`.
/// `adapter` gives `Ok(None)`.
pub fn parse_sentinel_fallback(value: &str) -> anyhow::Result<Option<SentinelFallback>> {
    match value.trim().to_lowercase().as_str() {
        "" | "adapter" => Ok(None),
        "none" => Ok(Some(SentinelFallback::None)),
        "first_entry_of_active_playlist" => Ok(Some(SentinelFallback::FirstEntryOfActivePlaylist)),
        other => Err(anyhow::anyhow!("unknown sentinel fallback '{}'", other)),
    }
}

/// Extension trait reading the `mirror:` section of a [`Config`].
pub trait MirrorConfigExt {
    fn mirror_settings(&self) -> anyhow::Result<MirrorSettings>;
}

impl MirrorConfigExt for Config {
    fn mirror_settings(&self) -> anyhow::Result<MirrorSettings> {
        let sentinel = self.get_sentinel_fallback()?;
        let sentinel_fallback = parse_sentinel_fallback(&sentinel).unwrap_or_else(|err| {
            warn!(error = %err, "Ignoring sentinel_fallback setting");
            None
        });

        let poll_interval_ms = self.get_poll_interval_ms()?;
        let reload_workers = self.get_reload_workers()?;

        Ok(MirrorSettings {
            poll_interval: (poll_interval_ms > 0).then(|| Duration::from_millis(poll_interval_ms)),
            min_reload_interval: Duration::from_millis(self.get_min_reload_interval_ms()?),
            reload_workers: reload_workers.max(1),
            sentinel_fallback,
            log_level: self.get_log_min_level()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_embedded_config() {
        let config = Config::defaults().unwrap();
        let settings = config.mirror_settings().unwrap();
        assert_eq!(settings.poll_interval, Some(Duration::from_millis(5000)));
        assert_eq!(settings.min_reload_interval, Duration::from_millis(1000));
        assert_eq!(settings.reload_workers, 2);
        assert_eq!(settings.sentinel_fallback, None);
        assert_eq!(settings.log_level, "INFO");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_yaml_str(
            "mirror:\n  poll_interval_ms: 0\n  reload_workers: 0\n  sentinel_fallback: first_entry_of_active_playlist\n",
        )
        .unwrap();
        let settings = config.mirror_settings().unwrap();
        assert_eq!(settings.poll_interval, None);
        assert_eq!(settings.reload_workers, 1);
        assert_eq!(
            settings.sentinel_fallback,
            Some(SentinelFallback::FirstEntryOfActivePlaylist)
        );
    }

    #[test]
    fn test_parse_sentinel_fallback() {
        assert_eq!(parse_sentinel_fallback("Adapter").unwrap(), None);
        assert_eq!(parse_sentinel_fallback("none").unwrap(), Some(SentinelFallback::None));
        assert!(parse_sentinel_fallback("random").is_err());
    }
}
