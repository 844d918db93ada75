//! Topic naming and MQTT-style filter matching

/// Root namespace for automation telemetry
pub const AUTOMATION_ROOT: &str = "homy/automation";

/// Topic a bot publishes exhausted verifications to
pub fn command_failed(bot_name: &str) -> String {
    format!("{}/{}/command_failed", AUTOMATION_ROOT, bot_name)
}

/// Filter matching the failure topic of every bot
pub fn command_failed_any() -> String {
    command_failed("+")
}

/// Check whether `topic` matches `filter`
///
/// `+` matches exactly one level, a trailing `#` matches the remaining levels
/// (including none).
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
