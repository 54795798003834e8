//! Interval resolution: how long a downloaded report stays fresh.

/// Default minimum hours between downloads for each report category.
pub const CATEGORY_INTERVAL_DEFAULTS: &[(&str, i64)] = &[("activity", 6), ("trade-confirmation", 1)];

/// Fallback for categories this build does not know about.
pub const FALLBACK_INTERVAL_HOURS: i64 = 6;

pub fn valid_categories() -> Vec<&'static str> {
    CATEGORY_INTERVAL_DEFAULTS.iter().map(|(c, _)| *c).collect()
}

pub fn category_default_hours(category: &str) -> i64 {
    CATEGORY_INTERVAL_DEFAULTS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, h)| *h)
        .unwrap_or(FALLBACK_INTERVAL_HOURS)
}

/// Effective freshness interval for a definition: the per-definition
/// override when set, otherwise the category default.
pub fn effective_interval_hours(category: &str, interval_override: Option<i64>) -> i64 {
    match interval_override {
        Some(hours) => hours,
        None => category_default_hours(category),
    }
}
