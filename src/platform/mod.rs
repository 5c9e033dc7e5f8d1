pub mod telegram;

/// A chat message reduced to what the command router needs
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Platform-specific chat/channel ID as string
    pub chat_id: String,
    /// Platform-specific user ID as string, empty when the sender is unknown
    pub user_id: String,
    /// The message text
    pub text: String,
}
