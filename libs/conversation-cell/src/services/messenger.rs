use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::ConversationError;
use crate::models::Channel;

/// Result of a successful send — the provider's own message id, when it
/// has one (SMS and Instagram do; webchat typically does not).
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SendOutcome, ConversationError>;
}

#[async_trait]
pub trait InstagramSender: Send + Sync {
    async fn send_instagram(&self, to: &str, body: &str) -> Result<SendOutcome, ConversationError>;
}

#[async_trait]
pub trait WebChatSender: Send + Sync {
    async fn send_webchat(&self, conversation_id: &str, body: &str) -> Result<SendOutcome, ConversationError>;
}

/// Dispatches a reply to the right per-channel sender based on the
/// `Channel` carried by the conversation, never by inspecting a sender's
/// concrete type. One `Messenger` is built per deployment from whichever
/// senders are configured; a channel with no sender wired in fails with
/// `SendFailed` rather than silently dropping the reply.
pub struct Messenger {
    sms: Option<Box<dyn SmsSender>>,
    instagram: Option<Box<dyn InstagramSender>>,
    webchat: Option<Box<dyn WebChatSender>>,
}

impl Messenger {
    pub fn new() -> Self {
        Self { sms: None, instagram: None, webchat: None }
    }

    pub fn with_sms(mut self, sender: impl SmsSender + 'static) -> Self {
        self.sms = Some(Box::new(sender));
        self
    }

    pub fn with_instagram(mut self, sender: impl InstagramSender + 'static) -> Self {
        self.instagram = Some(Box::new(sender));
        self
    }

    pub fn with_webchat(mut self, sender: impl WebChatSender + 'static) -> Self {
        self.webchat = Some(Box::new(sender));
        self
    }

    pub async fn send(&self, channel: Channel, conversation_id: &str, to: &str, from: &str, body: &str) -> Result<SendOutcome, ConversationError> {
        match channel {
            Channel::Sms => match &self.sms {
                Some(sender) => sender.send_sms(to, from, body).await,
                None => Err(ConversationError::SendFailed("no sms sender configured".into())),
            },
            Channel::Instagram => match &self.instagram {
                Some(sender) => sender.send_instagram(to, body).await,
                None => Err(ConversationError::SendFailed("no instagram sender configured".into())),
            },
            Channel::WebChat => match &self.webchat {
                Some(sender) => sender.send_webchat(conversation_id, body).await,
                None => Err(ConversationError::SendFailed("no webchat sender configured".into())),
            },
            Channel::Voice => {
                // Voice replies are spoken by the call leg, not sent through a
                // messenger; a voice-channel conversation never reaches this path
                // except for its post-call SMS handoff, which arrives as Channel::Sms.
                Err(ConversationError::SendFailed("voice channel has no messenger send path".into()))
            }
        }
    }
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs instead of calling out to a carrier/platform API. Stands in for
/// a real Telnyx/Twilio, Instagram Graph API, or webchat socket adapter
/// until a deployment wires one in; every sender still returns a
/// synthetic provider id so downstream transcript entries look real.
pub struct LoggingSmsSender;

#[async_trait]
impl SmsSender for LoggingSmsSender {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SendOutcome, ConversationError> {
        info!(to, from, body, "sms send (logging adapter)");
        Ok(SendOutcome { provider_message_id: Some(format!("sms_{}", Uuid::new_v4())) })
    }
}

pub struct LoggingInstagramSender;

#[async_trait]
impl InstagramSender for LoggingInstagramSender {
    async fn send_instagram(&self, to: &str, body: &str) -> Result<SendOutcome, ConversationError> {
        info!(to, body, "instagram send (logging adapter)");
        Ok(SendOutcome { provider_message_id: Some(format!("ig_{}", Uuid::new_v4())) })
    }
}

pub struct LoggingWebChatSender;

#[async_trait]
impl WebChatSender for LoggingWebChatSender {
    async fn send_webchat(&self, conversation_id: &str, body: &str) -> Result<SendOutcome, ConversationError> {
        info!(conversation_id, body, "webchat send (logging adapter)");
        Ok(SendOutcome { provider_message_id: None })
    }
}
