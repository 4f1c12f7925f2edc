//! Device configuration map and change detection.
//!
//! The directory service sends a device's full configuration on every
//! update. [`diff`] reduces that to the keys that actually changed, and
//! flags updates that silently dropped a key so the runtime can relink
//! the device instead of guessing what a missing key means.

use std::collections::BTreeMap;

/// A device's service configuration, keyed by config name.
pub type Config = BTreeMap<String, String>;

/// Build a [`Config`] from key/value pairs.
///
/// Later duplicates overwrite earlier ones.
pub fn config_from_pairs<I, K, V>(pairs: I) -> Config
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Result of comparing two configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Keys that were added or whose value changed, with their new value.
    /// Keys missing from the new config appear here mapped to `""`.
    pub changes: Config,
    /// Set when a key of the original config is absent from the new one.
    pub incomplete: bool,
}

impl ConfigDiff {
    /// True when nothing changed and no key went missing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.incomplete
    }
}

/// Compute the changes needed to go from `original` to `new`.
#[must_use]
pub fn diff(original: &Config, new: &Config) -> ConfigDiff {
    let mut changes = new.clone();
    let mut incomplete = false;

    for (key, value) in original {
        match changes.get(key) {
            Some(new_value) if new_value == value => {
                changes.remove(key);
            }
            Some(_) => {}
            None => {
                incomplete = true;
                changes.insert(key.clone(), String::new());
            }
        }
    }

    ConfigDiff {
        changes,
        incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Config {
        config_from_pairs(pairs.iter().copied())
    }

    #[test]
    fn identical_configs_have_no_diff() {
        let a = cfg(&[("rxconfig", "[]"), ("txconfig", "[]")]);
        let d = diff(&a, &a);
        assert!(d.is_empty());
        assert_eq!(d, ConfigDiff::default());

        assert!(diff(&Config::new(), &Config::new()).is_empty());
    }

    #[test]
    fn changed_value_is_reported() {
        let d = diff(&cfg(&[("k", "v1"), ("x", "1")]), &cfg(&[("k", "v2"), ("x", "1")]));
        assert_eq!(d.changes, cfg(&[("k", "v2")]));
        assert!(!d.incomplete);
    }

    #[test]
    fn added_key_is_reported() {
        let d = diff(&cfg(&[("k", "v")]), &cfg(&[("k", "v"), ("new", "1")]));
        assert_eq!(d.changes, cfg(&[("new", "1")]));
        assert!(!d.incomplete);
    }

    #[test]
    fn missing_key_marks_incomplete() {
        let d = diff(&cfg(&[("k", "v"), ("gone", "x")]), &cfg(&[("k", "v")]));
        assert!(d.incomplete);
        assert_eq!(d.changes, cfg(&[("gone", "")]));
        assert!(!d.is_empty());
    }

    #[test]
    fn missing_and_changed_keys_together() {
        let d = diff(&cfg(&[("a", "1"), ("b", "2")]), &cfg(&[("a", "3")]));
        assert!(d.incomplete);
        assert_eq!(d.changes, cfg(&[("a", "3"), ("b", "")]));
    }

    #[test]
    fn pairs_later_duplicates_win() {
        let c = config_from_pairs([("k", "1"), ("k", "2")]);
        assert_eq!(c.len(), 1);
        assert_eq!(c["k"], "2");
    }
}
