//! Inbound message from WhatsApp: delivered to the router for activation handling and forwarding.

use crate::channels::protocol::{MessageContent, WebMessage};
use crate::config::TriggerWords;
use crate::session::SenderId;

/// Control keywords recognised in text messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Trigger,
    EndTrigger,
}

/// Classified payload of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Text(String),
    Location { latitude: f64, longitude: f64 },
    Control(ControlKind),
    Other,
}

/// A message from a sender to be routed by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub sender: SenderId,
    pub event: InboundEvent,
}

impl InboundEvent {
    /// Extract the event from a raw payload: plain conversation text, then extended text,
    /// then location. Text is trimmed; empty text and anything else is `Other`.
    pub fn from_content(content: &MessageContent) -> Self {
        let text = content
            .conversation
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                content
                    .extended_text_message
                    .as_ref()
                    .and_then(|e| e.text.as_deref())
                    .filter(|s| !s.is_empty())
            });
        if let Some(text) = text {
            let text = text.trim();
            return if text.is_empty() {
                InboundEvent::Other
            } else {
                InboundEvent::Text(text.to_string())
            };
        }
        if let Some(loc) = &content.location_message {
            return InboundEvent::Location {
                latitude: loc.degrees_latitude,
                longitude: loc.degrees_longitude,
            };
        }
        InboundEvent::Other
    }

    /// Turn text matching a configured keyword into a control event.
    pub fn classify(self, triggers: &TriggerWords) -> Self {
        match self {
            InboundEvent::Text(ref text) if triggers.is_trigger(text) => {
                InboundEvent::Control(ControlKind::Trigger)
            }
            InboundEvent::Text(ref text) if triggers.is_end_trigger(text) => {
                InboundEvent::Control(ControlKind::EndTrigger)
            }
            other => other,
        }
    }
}

/// Pick the message to route from an upsert batch. Only `notify` batches count; the first
/// message is used; messages without a body or sent by us are skipped.
pub fn inbound_from_upsert(upsert_type: &str, messages: &[WebMessage]) -> Option<InboundMessage> {
    if upsert_type != "notify" {
        return None;
    }
    let msg = messages.first()?;
    if msg.key.from_me {
        return None;
    }
    let content = msg.message.as_ref()?;
    Some(InboundMessage {
        sender: msg.key.remote_jid.clone(),
        event: InboundEvent::from_content(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::protocol::{ExtendedTextMessage, LocationMessage, MessageKey};

    fn text(conversation: Option<&str>, extended: Option<&str>) -> MessageContent {
        MessageContent {
            conversation: conversation.map(String::from),
            extended_text_message: extended.map(|t| ExtendedTextMessage {
                text: Some(t.to_string()),
            }),
            location_message: None,
        }
    }

    fn web(jid: &str, from_me: bool, content: Option<MessageContent>) -> WebMessage {
        WebMessage {
            key: MessageKey {
                remote_jid: jid.to_string(),
                from_me,
            },
            message: content,
        }
    }

    #[test]
    fn conversation_text_is_trimmed() {
        assert_eq!(
            InboundEvent::from_content(&text(Some("  hello  "), None)),
            InboundEvent::Text("hello".to_string())
        );
    }

    #[test]
    fn extended_text_used_when_conversation_empty() {
        assert_eq!(
            InboundEvent::from_content(&text(Some(""), Some("reply text"))),
            InboundEvent::Text("reply text".to_string())
        );
    }

    #[test]
    fn whitespace_only_text_is_other() {
        assert_eq!(
            InboundEvent::from_content(&text(Some("   "), None)),
            InboundEvent::Other
        );
    }

    #[test]
    fn location_payload() {
        let content = MessageContent {
            location_message: Some(LocationMessage {
                degrees_latitude: 1.5,
                degrees_longitude: 2.5,
            }),
            ..Default::default()
        };
        assert_eq!(
            InboundEvent::from_content(&content),
            InboundEvent::Location {
                latitude: 1.5,
                longitude: 2.5
            }
        );
    }

    #[test]
    fn media_without_caption_is_other() {
        assert_eq!(
            InboundEvent::from_content(&MessageContent::default()),
            InboundEvent::Other
        );
    }

    #[test]
    fn classify_keywords_case_insensitively() {
        let triggers = TriggerWords::new(Some("start"), Some("stop")).unwrap();
        assert_eq!(
            InboundEvent::Text("START".into()).classify(&triggers),
            InboundEvent::Control(ControlKind::Trigger)
        );
        assert_eq!(
            InboundEvent::Text("Stop".into()).classify(&triggers),
            InboundEvent::Control(ControlKind::EndTrigger)
        );
        assert_eq!(
            InboundEvent::Text("start please".into()).classify(&triggers),
            InboundEvent::Text("start please".into())
        );
        assert_eq!(InboundEvent::Other.classify(&triggers), InboundEvent::Other);
    }

    #[test]
    fn upsert_filtering() {
        let hello = || Some(text(Some("hello"), None));
        assert!(inbound_from_upsert("append", &[web("a", false, hello())]).is_none());
        assert!(inbound_from_upsert("notify", &[web("a", true, hello())]).is_none());
        assert!(inbound_from_upsert("notify", &[web("a", false, None)]).is_none());
        assert!(inbound_from_upsert("notify", &[]).is_none());

        let msg = inbound_from_upsert(
            "notify",
            &[web("a", false, hello()), web("b", false, hello())],
        )
        .unwrap();
        assert_eq!(msg.sender, "a");
        assert_eq!(msg.event, InboundEvent::Text("hello".to_string()));
    }
}
