//! Decides whether a command changed the active window, from the
//! accessibility-event log captured while it ran.

use crate::logcat::LogMap;
use serde_json::{Map, Value};
use tracing::warn;

pub const WINDOW_CHANGE_MARKER: &str = "WindowContentChange:";

/// `Some(changed == active)` for a record object carrying both window ids.
fn parse_change(record: &str) -> Option<bool> {
    let object: Map<String, Value> = serde_json::from_str(record).ok()?;
    let changed = object.get("changedWindowId")?;
    let active = object.get("activeWindowId")?;
    Some(changed == active)
}

/// True iff a content-change record reports the change in the active
/// window. Never fails: a missing tag or a malformed record yields `false`.
pub fn is_window_changed(logs: &LogMap, events_tag: &str) -> bool {
    let Some(events) = logs.get(events_tag) else {
        warn!(tag = events_tag, "window change check: tag not captured");
        return false;
    };

    for line in events.lines() {
        let Some((_, record)) = line.split_once(WINDOW_CHANGE_MARKER) else {
            continue;
        };
        match parse_change(record.trim()) {
            Some(true) => return true,
            Some(false) => {}
            None => {
                warn!(record = record.trim(), "window change check: malformed record");
                return false;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: &str = "LATTE_A11Y_EVENT_TAG";

    fn logs(text: &str) -> LogMap {
        let mut map = LogMap::new();
        map.insert(TAG.to_string(), text.to_string());
        map
    }

    #[test]
    fn change_in_active_window() {
        let map = logs(
            "TYPE_VIEW_FOCUSED\nWindowContentChange: {\"changedWindowId\": 7, \"activeWindowId\": 7}\n",
        );
        assert!(is_window_changed(&map, TAG));
    }

    #[test]
    fn change_in_background_window_is_ignored() {
        let map = logs("WindowContentChange: {\"changedWindowId\": 3, \"activeWindowId\": 7}");
        assert!(!is_window_changed(&map, TAG));
    }

    #[test]
    fn malformed_input_is_no_change() {
        assert!(!is_window_changed(&LogMap::new(), TAG));
        assert!(!is_window_changed(&logs("WindowContentChange: {\"changedWindowId\": 7"), TAG));
        assert!(!is_window_changed(&logs("WindowContentChange: {\"activeWindowId\": 7}"), TAG));
        assert!(!is_window_changed(&logs("WindowContentChange:"), TAG));
        assert!(!is_window_changed(&logs("WindowContentChange: [7, 7]"), TAG));
        assert!(!is_window_changed(&logs("WindowContentChange: \"7\""), TAG));
    }

    #[test]
    fn first_malformed_record_stops_the_scan() {
        let map = logs(
            "WindowContentChange: nope\nWindowContentChange: {\"changedWindowId\": 1, \"activeWindowId\": 1}",
        );
        assert!(!is_window_changed(&map, TAG));
    }
}
