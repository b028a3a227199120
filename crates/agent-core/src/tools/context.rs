use tokio_util::sync::CancellationToken;

/// Request-scoped data handed to every tool execution.
///
/// Tools that need to address the originating conversation (for example to
/// schedule a reply) read `channel` and `chat_id` from here. The cancel token
/// is the turn's token; long-running tools should select on it.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: Option<String>,
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub cancel_token: CancellationToken,
}

impl ToolContext {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}
