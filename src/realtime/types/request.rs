use serde::Serialize;

/// Control message sent once on every successful open.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Action type, always `subscribe` for this message
    pub action: SubscriptionAction,
    /// Channel to subscribe to: the `team_id` of the current session
    pub channel: String,
}

impl SubscribeRequest {
    /// Create a subscribe request for `channel`.
    #[must_use]
    pub fn subscribe<S: Into<String>>(channel: S) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            channel: channel.into(),
        }
    }
}

/// Subscription action type.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Subscribe to a channel
    Subscribe,
}
