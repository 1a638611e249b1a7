//! Topic name and filter rules.
//!
//! `/` separates levels, `+` matches exactly one level and `#` matches the
//! remaining levels (including none). Topics starting with `$` are not
//! matched by a leading wildcard.

/// A topic a message may be published to: non-empty, no wildcards.
pub fn valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#', '\0'])
}

/// A subscription filter: non-empty, wildcards occupy whole levels, `#` last.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        level => !level.contains(['+', '#']),
    })
}

/// Whether `topic` matches `filter`. Both are assumed valid.
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_validity() {
        assert!(valid_topic("sensors/kitchen/temp"));
        assert!(valid_topic("/leading/slash"));
        assert!(!valid_topic(""));
        assert!(!valid_topic("sensors/+"));
        assert!(!valid_topic("alerts/#"));
    }

    #[test]
    fn filter_validity() {
        assert!(valid_filter("sensors/+"));
        assert!(valid_filter("alerts/#"));
        assert!(valid_filter("#"));
        assert!(valid_filter("+/+/temp"));
        assert!(!valid_filter(""));
        assert!(!valid_filter("alerts/#/more"));
        assert!(!valid_filter("sensors/kit+chen"));
        assert!(!valid_filter("alerts#"));
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches("sensors/+", "sensors/kitchen"));
        assert!(!matches("sensors/+", "sensors/kitchen/temp"));
        assert!(matches("alerts/#", "alerts"));
        assert!(matches("alerts/#", "alerts/fire/floor1"));
        assert!(matches("#", "anything/at/all"));
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/c"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
    }

    #[test]
    fn system_topics_hidden_from_leading_wildcards() {
        assert!(!matches("#", "$SYS/uptime"));
        assert!(!matches("+/uptime", "$SYS/uptime"));
        assert!(matches("$SYS/#", "$SYS/uptime"));
    }
}
