// src/utils/progress_config.rs
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::utils::env::{parse_or, process_env};

/// Progress reporting knobs for a deduplication run.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Whether to show progress bars at all
    pub enabled: bool,
    /// Whether to show per-phase sub-progress bars
    pub detailed: bool,
    /// Whether to show memory usage in phase messages
    pub show_memory: bool,
    /// Whether to report feature cache hit/miss counts
    pub show_cache_stats: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: true,
            show_memory: true,
            show_cache_stats: true,
        }
    }
}

impl ProgressConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    /// Reads the `PROGRESS_*` keys through `get`; unset or unparsable keys stay on.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enabled: parse_or(get("PROGRESS_ENABLED"), true),
            detailed: parse_or(get("PROGRESS_DETAILED"), true),
            show_memory: parse_or(get("PROGRESS_SHOW_MEMORY"), true),
            show_cache_stats: parse_or(get("PROGRESS_SHOW_CACHE_STATS"), true),
        }
    }

    /// No bars and no extra stats; for library callers and tests.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            detailed: false,
            show_memory: false,
            show_cache_stats: false,
        }
    }

    /// A MultiProgress when progress is enabled, None otherwise.
    pub fn create_multi_progress(&self) -> Option<MultiProgress> {
        if self.enabled {
            Some(MultiProgress::new())
        } else {
            None
        }
    }

    pub fn should_show_detailed(&self) -> bool {
        self.enabled && self.detailed
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }

    pub fn should_show_cache_stats(&self) -> bool {
        self.enabled && self.show_cache_stats
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
}

/// Top-level bar counting pipeline stages (load, deduplicate, persist).
pub fn pipeline_bar(mp: Option<&MultiProgress>, stages: u64) -> Option<ProgressBar> {
    mp.map(|mp| {
        let pb = mp.add(ProgressBar::new(stages));
        pb.set_style(bar_style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
        ));
        pb
    })
}

/// Adds a bar for `len` items to `mp`, or returns None when there is no MultiProgress.
pub fn phase_bar(mp: Option<&MultiProgress>, len: u64, message: &str) -> Option<ProgressBar> {
    mp.map(|mp| {
        let pb = mp.add(ProgressBar::new(len));
        pb.set_style(bar_style(
            "  {spinner:.blue} [{elapsed_precise}] {bar:30.green/white} {pos}/{len} {msg}",
        ));
        pb.set_message(message.to_string());
        pb
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_and_fallbacks() {
        let vars = HashMap::from([
            ("PROGRESS_DETAILED", "false"),
            ("PROGRESS_SHOW_MEMORY", "not-a-bool"),
        ]);
        let config = ProgressConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert!(config.enabled);
        assert!(!config.detailed);
        assert!(config.show_memory);
        assert!(!config.should_show_detailed());
    }

    #[test]
    fn test_disabled_hides_everything() {
        let config = ProgressConfig::disabled();
        assert!(config.create_multi_progress().is_none());
        assert!(!config.should_show_memory());
        assert!(!config.should_show_cache_stats());
        assert!(phase_bar(None, 10, "Scoring pairs").is_none());
        assert!(pipeline_bar(None, 3).is_none());
    }

    #[test]
    fn test_bars_attach_to_multi_progress() {
        let mp = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let pb = phase_bar(Some(&mp), 42, "Normalizing descriptions").unwrap();
        assert_eq!(pb.length(), Some(42));
        assert_eq!(pb.message(), "Normalizing descriptions");

        let mut config = ProgressConfig::default();
        config.show_memory = false;
        assert!(config.should_show_detailed());
        assert!(!config.should_show_memory());
    }
}
