//! Inbound objects: replies and push events.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::request::MessageSender;

/// 64-bit identifiers arrive as JSON numbers or as decimal strings
mod int64 {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Error reported by the remote platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Numeric error code
    pub code: i32,
    /// Error reason
    pub message: String,
}

impl RemoteError {
    /// Create a remote error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E({}): {}", self.code, self.message)
    }
}

/// Login lifecycle reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum AuthorizationState {
    /// Session parameters must be provided
    #[serde(rename = "authorizationStateWaitTdlibParameters")]
    AwaitingParameters,
    /// A phone number must be provided
    #[serde(rename = "authorizationStateWaitPhoneNumber")]
    AwaitingPhoneNumber,
    /// An email address must be provided
    #[serde(rename = "authorizationStateWaitEmailAddress")]
    AwaitingEmailAddress,
    /// The email verification code must be provided
    #[serde(rename = "authorizationStateWaitEmailCode")]
    AwaitingEmailCode,
    /// The login code must be provided
    #[serde(rename = "authorizationStateWaitCode")]
    AwaitingCode,
    /// The two-step verification password must be provided
    #[serde(rename = "authorizationStateWaitPassword")]
    AwaitingPassword,
    /// A new account must be registered
    #[serde(rename = "authorizationStateWaitRegistration")]
    AwaitingRegistration,
    /// The login link must be confirmed on another device
    #[serde(rename = "authorizationStateWaitOtherDeviceConfirmation")]
    AwaitingOtherDeviceConfirmation {
        /// Link to open on the other device
        #[serde(default)]
        link: String,
    },
    /// Logged in
    #[serde(rename = "authorizationStateReady")]
    Ready,
    /// Logging out
    #[serde(rename = "authorizationStateLoggingOut")]
    LoggingOut,
    /// Session is closing
    #[serde(rename = "authorizationStateClosing")]
    Closing,
    /// Session closed, a new one must be created
    #[serde(rename = "authorizationStateClosed")]
    Closed,
}

impl AuthorizationState {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            AuthorizationState::AwaitingParameters => "awaiting-parameters",
            AuthorizationState::AwaitingPhoneNumber => "awaiting-phone-number",
            AuthorizationState::AwaitingEmailAddress => "awaiting-email-address",
            AuthorizationState::AwaitingEmailCode => "awaiting-email-code",
            AuthorizationState::AwaitingCode => "awaiting-code",
            AuthorizationState::AwaitingPassword => "awaiting-password",
            AuthorizationState::AwaitingRegistration => "awaiting-registration",
            AuthorizationState::AwaitingOtherDeviceConfirmation { .. } => {
                "awaiting-other-device-confirmation"
            }
            AuthorizationState::Ready => "ready",
            AuthorizationState::LoggingOut => "logging-out",
            AuthorizationState::Closing => "closing",
            AuthorizationState::Closed => "closed",
        }
    }
}

/// Purchase limits of a limited gift
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftPurchaseLimits {
    /// Total number of gifts that can be bought
    pub total_count: i32,
    /// Number of gifts still available
    pub remaining_count: i32,
}

/// Catalogue entry of a regular gift
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gift {
    /// Gift identifier
    #[serde(deserialize_with = "int64::deserialize")]
    pub id: i64,
    /// Price in stars
    pub star_count: i64,
    /// Upgrade price in stars, zero if not upgradable
    pub upgrade_star_count: i64,
    /// Limits, absent for unlimited gifts
    pub overall_limits: Option<GiftPurchaseLimits>,
}

impl Gift {
    /// Limited gift with stock left
    pub fn is_limited_in_stock(&self) -> bool {
        self.overall_limits
            .as_ref()
            .map(|l| l.total_count > 0 && l.remaining_count > 0)
            .unwrap_or(false)
    }
}

/// Named attribute of an upgraded gift (model, backdrop or symbol)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftAttribute {
    /// Attribute name
    pub name: String,
}

/// A unique (upgraded) gift
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradedGift {
    /// Unique gift identifier
    #[serde(deserialize_with = "int64::deserialize")]
    pub id: i64,
    /// Display title
    pub title: String,
    /// Model attribute
    pub model: Option<GiftAttribute>,
    /// Backdrop attribute
    pub backdrop: Option<GiftAttribute>,
    /// Symbol attribute
    pub symbol: Option<GiftAttribute>,
}

/// Gift content of a received gift
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum SentGift {
    /// A regular gift
    SentGiftRegular {
        /// The gift
        gift: Gift,
    },
    /// An upgraded gift
    SentGiftUpgraded {
        /// The gift
        gift: UpgradedGift,
    },
}

/// A gift held by a user or chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedGift {
    /// Received gift identifier
    pub received_gift_id: String,
    /// Whether the gift can be upgraded right now
    #[serde(default)]
    pub can_be_upgraded: bool,
    /// Gift content
    pub gift: Option<SentGift>,
}

/// One page of received gifts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivedGifts {
    /// Gifts on this page
    pub gifts: Vec<ReceivedGift>,
    /// Offset of the next page, empty on the last page
    pub next_offset: String,
}

/// Catalogue item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableGift {
    /// The gift
    pub gift: Gift,
}

/// Purchasable gift catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailableGifts {
    /// Catalogue items
    pub gifts: Vec<AvailableGift>,
}

/// Result of a successful upgrade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeGiftResult {
    /// The upgraded gift
    pub gift: UpgradedGift,
    /// Identifier of the upgraded received gift
    pub received_gift_id: String,
}

/// A user account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// User identifier
    pub id: i64,
    /// First name
    pub first_name: String,
}

/// Formatted text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormattedText {
    /// Plain text
    pub text: String,
}

/// Content of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageContent {
    /// A text message
    MessageText {
        /// Message text
        text: FormattedText,
    },
    /// Anything else
    #[serde(other)]
    Unsupported,
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier
    #[serde(default)]
    pub id: i64,
    /// Chat the message belongs to
    pub chat_id: i64,
    /// Sender of the message
    pub sender_id: Option<MessageSender>,
    /// Whether this client sent it
    #[serde(default)]
    pub is_outgoing: bool,
    /// Message content
    pub content: Option<MessageContent>,
}

impl Message {
    /// Text of a text message
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::MessageText { text }) => Some(text.text.as_str()),
            _ => None,
        }
    }

    /// Sender user id when the sender is a user
    pub fn sender_user_id(&self) -> Option<i64> {
        match self.sender_id {
            Some(MessageSender::MessageSenderUser { user_id }) => Some(user_id),
            _ => None,
        }
    }
}

/// Any object received from the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Object {
    /// Remote error
    Error(RemoteError),
    /// Empty success
    Ok,
    /// User account
    User(User),
    /// Single received gift
    ReceivedGift(ReceivedGift),
    /// Page of received gifts
    ReceivedGifts(ReceivedGifts),
    /// Gift catalogue
    AvailableGifts(AvailableGifts),
    /// Upgrade success
    UpgradeGiftResult(UpgradeGiftResult),
    /// Authorization state changed
    UpdateAuthorizationState {
        /// New state
        authorization_state: AuthorizationState,
    },
    /// New chat message
    UpdateNewMessage {
        /// The message
        message: Message,
    },
    /// Object kinds this client does not model
    #[serde(other)]
    Unknown,
}

impl Object {
    /// Short kind name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Error(_) => "error",
            Object::Ok => "ok",
            Object::User(_) => "user",
            Object::ReceivedGift(_) => "receivedGift",
            Object::ReceivedGifts(_) => "receivedGifts",
            Object::AvailableGifts(_) => "availableGifts",
            Object::UpgradeGiftResult(_) => "upgradeGiftResult",
            Object::UpdateAuthorizationState { .. } => "updateAuthorizationState",
            Object::UpdateNewMessage { .. } => "updateNewMessage",
            Object::Unknown => "unknown",
        }
    }

    /// Remote error carried by this object, if any
    pub fn as_error(&self) -> Option<&RemoteError> {
        match self {
            Object::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Convert an unsolicited object into a push event
    pub fn into_push(self) -> PushEvent {
        match self {
            Object::UpdateAuthorizationState {
                authorization_state,
            } => PushEvent::AuthorizationState(authorization_state),
            Object::UpdateNewMessage { message } => PushEvent::NewMessage(message),
            other => PushEvent::Other(other.kind()),
        }
    }
}

/// Push events routed to push handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// Authorization state changed
    AuthorizationState(AuthorizationState),
    /// New chat message
    NewMessage(Message),
    /// Any other push, by kind name
    Other(&'static str),
}

/// Inbound frame: correlation id plus object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id, `0` for push events
    pub id: u64,
    /// Decoded object
    pub object: Object,
}

impl Frame {
    /// Create a frame
    pub fn new(id: u64, object: Object) -> Self {
        Self { id, object }
    }

    /// Create a push frame
    pub fn push(object: Object) -> Self {
        Self::new(crate::id::PUSH_ID, object)
    }
}
