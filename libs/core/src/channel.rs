use serde::{Deserialize, Serialize};

/// Supported messaging channels.
///
/// ```
/// use peregrine_core::Channel;
///
/// let c = Channel::Email;
/// assert_eq!(c.as_str(), "Email");
/// assert_eq!(c.identifier_key(), Some("email"));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Sms,
    MobilePush,
    Webhook,
}

impl Channel {
    /// String form used in event-log properties and query filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "Email",
            Channel::Sms => "Sms",
            Channel::MobilePush => "MobilePush",
            Channel::Webhook => "Webhook",
        }
    }

    /// Fixed user-property key holding the channel's recipient identifier.
    ///
    /// Webhook templates declare their own identifier key, so the channel
    /// itself has none.
    pub fn identifier_key(&self) -> Option<&'static str> {
        match self {
            Channel::Email => Some("email"),
            Channel::Sms => Some("phone"),
            Channel::MobilePush => Some("deviceToken"),
            Channel::Webhook => None,
        }
    }

    /// Case-insensitive parse; legacy event payloads carry lowercase channel
    /// names.
    pub fn from_str_loose(value: &str) -> Option<Channel> {
        match value.to_ascii_lowercase().as_str() {
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            "mobilepush" => Some(Channel::MobilePush),
            "webhook" => Some(Channel::Webhook),
            _ => None,
        }
    }
}
