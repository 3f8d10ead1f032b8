use telegram_syncd::models::contact::PresenceStatus;
use telegram_syncd::models::conversation::{conversation_id, ChatKind};
use telegram_syncd::models::listener_state::ListenerStatus;
use telegram_syncd::models::message::Direction;
use telegram_syncd::models::outbox::{AttachmentKind, OutboxStatus};

#[test]
fn chat_kind_round_trips() {
    for kind in [
        ChatKind::Private,
        ChatKind::Group,
        ChatKind::Supergroup,
        ChatKind::Channel,
    ] {
        assert_eq!(ChatKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(ChatKind::parse("broadcast"), None);
}

#[test]
fn direction_round_trips() {
    for direction in [Direction::Inbound, Direction::Outbound] {
        assert_eq!(Direction::parse(direction.as_str()), Some(direction));
    }
    assert_eq!(Direction::parse("sideways"), None);
}

#[test]
fn outbox_status_round_trips() {
    for status in [
        OutboxStatus::Pending,
        OutboxStatus::Sending,
        OutboxStatus::Sent,
        OutboxStatus::Failed,
    ] {
        assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
    }
}

#[test]
fn listener_status_round_trips() {
    for status in [
        ListenerStatus::Starting,
        ListenerStatus::Running,
        ListenerStatus::Restarting,
        ListenerStatus::Stopped,
        ListenerStatus::Error,
        ListenerStatus::Failed,
    ] {
        assert_eq!(ListenerStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(ListenerStatus::parse("zombie"), None);
}

#[test]
fn attachment_kind_parses_known_kinds() {
    assert_eq!(AttachmentKind::parse("photo"), Some(AttachmentKind::Photo));
    assert_eq!(AttachmentKind::parse("voice"), Some(AttachmentKind::Voice));
    assert_eq!(AttachmentKind::parse("video"), Some(AttachmentKind::Video));
    assert_eq!(AttachmentKind::parse("audio"), Some(AttachmentKind::Audio));
    assert_eq!(
        AttachmentKind::parse("document"),
        Some(AttachmentKind::Document)
    );
    assert_eq!(AttachmentKind::parse("hologram"), None);
}

#[test]
fn presence_status_strings() {
    assert_eq!(PresenceStatus::Online.as_str(), "online");
    assert_eq!(PresenceStatus::LastWeek.as_str(), "last_week");
    assert!(PresenceStatus::Online.is_online());
    assert!(!PresenceStatus::Recently.is_online());
}

#[test]
fn conversation_ids_are_deterministic_per_chat() {
    let a = conversation_id(1_001);
    let b = conversation_id(1_001);
    let c = conversation_id(-2_002);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with('c'));
    assert_eq!(a.len(), 25);
}
