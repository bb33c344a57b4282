//! Reporting helpers: grouping positions by symbol and formatting hold times.

use crate::types::Position;
use chrono::Duration;
use std::collections::BTreeMap;

/// Group positions by symbol, preserving the input order within each group.
pub fn group_by_symbol(positions: Vec<Position>) -> BTreeMap<String, Vec<Position>> {
    let mut groups: BTreeMap<String, Vec<Position>> = BTreeMap::new();
    for position in positions {
        groups
            .entry(position.symbol().to_string())
            .or_default()
            .push(position);
    }
    groups
}

/// Compact duration: the two most significant non-zero units, e.g. `2d 3h`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let units = [
        (total / 86_400, "d"),
        ((total % 86_400) / 3_600, "h"),
        ((total % 3_600) / 60, "m"),
        (total % 60, "s"),
    ];

    let parts: Vec<String> = units
        .iter()
        .skip_while(|(value, _)| *value == 0)
        .take(2)
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect();

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}
