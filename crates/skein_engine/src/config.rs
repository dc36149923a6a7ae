use skein_domain::ListingLimits;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TITLE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub listing: ListingLimits,
    pub title_timeout: Duration,
    /// Where the thread activity map is persisted. `None` keeps it in memory.
    pub activity_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listing: ListingLimits::default(),
            title_timeout: DEFAULT_TITLE_TIMEOUT,
            activity_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut out = Self::default();

        let limits = &mut out.listing;
        limits.page_size = read_positive(&lookup, "SKEIN_LIST_PAGE_SIZE", limits.page_size);
        limits.target_matches =
            read_positive(&lookup, "SKEIN_LIST_TARGET_MATCHES", limits.target_matches);
        limits.max_empty_pages =
            read_positive(&lookup, "SKEIN_LIST_MAX_EMPTY_PAGES", limits.max_empty_pages);

        let default_ms = u64::try_from(out.title_timeout.as_millis()).unwrap_or(u64::MAX);
        out.title_timeout = Duration::from_millis(read_positive(
            &lookup,
            "SKEIN_TITLE_TIMEOUT_MS",
            default_ms,
        ));

        out.activity_path = lookup("SKEIN_ACTIVITY_PATH")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        out
    }
}

fn read_positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return default;
    }
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            tracing::warn!(var = name, value = raw, default = %default, "ignoring invalid value");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        EngineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_listing_constants() {
        let config = config(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.listing.page_size, 20);
        assert_eq!(config.listing.target_matches, 20);
        assert_eq!(config.listing.max_empty_pages, 5);
        assert_eq!(config.title_timeout, Duration::from_secs(15));
    }

    #[test]
    fn overrides_are_read_and_invalid_values_fall_back() {
        let config = config(&[
            ("SKEIN_LIST_PAGE_SIZE", "50"),
            ("SKEIN_LIST_TARGET_MATCHES", "0"),
            ("SKEIN_LIST_MAX_EMPTY_PAGES", "many"),
            ("SKEIN_TITLE_TIMEOUT_MS", " 2500 "),
            ("SKEIN_ACTIVITY_PATH", "/tmp/skein/activity.json"),
        ]);
        assert_eq!(config.listing.page_size, 50);
        assert_eq!(config.listing.target_matches, 20);
        assert_eq!(config.listing.max_empty_pages, 5);
        assert_eq!(config.title_timeout, Duration::from_millis(2500));
        assert_eq!(
            config.activity_path,
            Some(PathBuf::from("/tmp/skein/activity.json"))
        );
    }

    #[test]
    fn blank_activity_path_stays_in_memory() {
        assert_eq!(config(&[("SKEIN_ACTIVITY_PATH", "  ")]).activity_path, None);
    }
}
