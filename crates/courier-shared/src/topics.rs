//! Broker topic contract.
//!
//! Every chat owns two topics, `chat/{channel_id}/messages` and
//! `chat/{channel_id}/read-receipts`.  Subscription patterns follow MQTT:
//! `+` matches exactly one level, a trailing `#` matches the remainder.

use crate::types::ChannelId;

pub const TOPIC_ROOT: &str = "chat";
pub const MESSAGES_SUFFIX: &str = "messages";
pub const RECEIPTS_SUFFIX: &str = "read-receipts";

/// Bootstrap subscription covering every chat's message topic.
pub const ALL_MESSAGES: &str = "chat/+/messages";

/// Bootstrap subscription covering every chat's receipt topic.
pub const ALL_RECEIPTS: &str = "chat/+/read-receipts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Messages,
    ReadReceipts,
}

pub fn messages_topic(channel: &ChannelId) -> String {
    format!("{TOPIC_ROOT}/{channel}/{MESSAGES_SUFFIX}")
}

pub fn receipts_topic(channel: &ChannelId) -> String {
    format!("{TOPIC_ROOT}/{channel}/{RECEIPTS_SUFFIX}")
}

/// Split a concrete topic into its channel id and kind.
///
/// Returns `None` for anything outside the `chat/{channel}/{suffix}` shape.
pub fn parse_topic(topic: &str) -> Option<(ChannelId, TopicKind)> {
    let rest = topic.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
    let (channel, suffix) = rest.rsplit_once('/')?;
    if channel.is_empty() || channel.contains('/') {
        return None;
    }

    let kind = match suffix {
        MESSAGES_SUFFIX => TopicKind::Messages,
        RECEIPTS_SUFFIX => TopicKind::ReadReceipts,
        _ => return None,
    };

    Some((ChannelId(channel.to_string()), kind))
}

/// Whether a concrete `topic` is covered by a subscription `pattern`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return pattern_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builders() {
        let channel = ChannelId("direct_1_2".into());
        assert_eq!(messages_topic(&channel), "chat/direct_1_2/messages");
        assert_eq!(receipts_topic(&channel), "chat/direct_1_2/read-receipts");
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches(ALL_MESSAGES, "chat/direct_1_2/messages"));
        assert!(!topic_matches(ALL_MESSAGES, "chat/direct_1_2/read-receipts"));
        assert!(!topic_matches(ALL_MESSAGES, "chat/a/b/messages"));
        assert!(!topic_matches(ALL_MESSAGES, "chat/messages"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("chat/#", "chat/group_x/read-receipts"));
        assert!(topic_matches("#", "chat/group_x/messages"));
        assert!(!topic_matches("chat/#/messages", "chat/x/messages"));
    }

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("chat/g/messages", "chat/g/messages"));
        assert!(!topic_matches("chat/g/messages", "chat/h/messages"));
    }

    #[test]
    fn test_parse_topic() {
        let (channel, kind) = parse_topic("chat/group_abc/read-receipts").unwrap();
        assert_eq!(channel.as_str(), "group_abc");
        assert_eq!(kind, TopicKind::ReadReceipts);

        assert!(parse_topic("chat/group_abc/typing").is_none());
        assert!(parse_topic("room/group_abc/messages").is_none());
        assert!(parse_topic("chat//messages").is_none());
    }
}
