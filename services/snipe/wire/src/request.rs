//! Outbound request payloads.

use serde::{Deserialize, Serialize};

/// Identifies the owner of a gift collection (a user or a chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageSender {
    /// A user account
    MessageSenderUser {
        /// User identifier
        user_id: i64,
    },
    /// A chat (channels use negative ids)
    MessageSenderChat {
        /// Chat identifier
        chat_id: i64,
    },
}

impl MessageSender {
    /// Negative ids address chats, everything else a user
    pub fn from_owner_id(id: i64) -> Self {
        if id < 0 {
            MessageSender::MessageSenderChat { chat_id: id }
        } else {
            MessageSender::MessageSenderUser { user_id: id }
        }
    }
}

/// Session initialization parameters sent while awaiting parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    /// Directory for the client's local database
    pub database_directory: String,
    /// Whether to keep a local message database
    pub use_message_database: bool,
    /// Whether secret chats are supported
    pub use_secret_chats: bool,
    /// Application identifier
    pub api_id: i32,
    /// Application hash
    pub api_hash: String,
    /// IETF language tag of the user's system
    pub system_language_code: String,
    /// Device model reported to the platform
    pub device_model: String,
    /// Application version reported to the platform
    pub application_version: String,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            database_directory: "snipe_td".to_string(),
            use_message_database: true,
            use_secret_chats: true,
            api_id: 0,
            api_hash: String::new(),
            system_language_code: "en".to_string(),
            device_model: "Desktop".to_string(),
            application_version: "1.0".to_string(),
        }
    }
}

/// Remote operations this client issues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Request {
    /// Query an option value
    GetOption {
        /// Option name
        name: String,
    },
    /// Provide session initialization parameters
    SetTdlibParameters(SessionParameters),
    /// Start login with a phone number
    SetAuthenticationPhoneNumber {
        /// Phone number in international format
        phone_number: String,
    },
    /// Provide the login email address
    SetAuthenticationEmailAddress {
        /// Email address
        email_address: String,
    },
    /// Check the code sent to the login email
    CheckAuthenticationEmailCode {
        /// Email verification code
        code: String,
    },
    /// Check the login code
    CheckAuthenticationCode {
        /// Code received by the user
        code: String,
    },
    /// Check the two-step verification password
    CheckAuthenticationPassword {
        /// Account password
        password: String,
    },
    /// Finish registration of a new account
    RegisterUser {
        /// First name
        first_name: String,
        /// Last name
        last_name: String,
    },
    /// Fetch the current user
    GetMe,
    /// Fetch a single received gift
    GetReceivedGift {
        /// Received gift identifier
        received_gift_id: String,
    },
    /// Page through gifts received by an owner
    GetReceivedGifts {
        /// Business connection, empty for none
        business_connection_id: String,
        /// Owner of the gifts
        owner_id: MessageSender,
        /// Offset returned by the previous page, empty for the first
        offset: String,
        /// Maximum number of gifts per page
        limit: i32,
    },
    /// Fetch the purchasable gift catalogue
    GetAvailableGifts,
    /// Upgrade a received gift to a unique one
    UpgradeGift {
        /// Business connection, empty for none
        business_connection_id: String,
        /// Received gift identifier
        received_gift_id: String,
        /// Keep the original sender/text
        keep_original_details: bool,
        /// Expected upgrade price in stars
        star_count: i64,
    },
    /// Buy a gift for an owner
    SendGift {
        /// Gift identifier from the catalogue
        gift_id: i64,
        /// Recipient
        owner_id: MessageSender,
        /// Hide sender name
        is_private: bool,
        /// Pay for the upgrade up front
        pay_for_upgrade: bool,
    },
}

impl Request {
    /// Upgrade request with default details handling
    pub fn upgrade(received_gift_id: impl Into<String>, star_count: i64) -> Self {
        Request::UpgradeGift {
            business_connection_id: String::new(),
            received_gift_id: received_gift_id.into(),
            keep_original_details: false,
            star_count,
        }
    }

    /// Short operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetOption { .. } => "getOption",
            Request::SetTdlibParameters(_) => "setTdlibParameters",
            Request::SetAuthenticationPhoneNumber { .. } => "setAuthenticationPhoneNumber",
            Request::SetAuthenticationEmailAddress { .. } => "setAuthenticationEmailAddress",
            Request::CheckAuthenticationEmailCode { .. } => "checkAuthenticationEmailCode",
            Request::CheckAuthenticationCode { .. } => "checkAuthenticationCode",
            Request::CheckAuthenticationPassword { .. } => "checkAuthenticationPassword",
            Request::RegisterUser { .. } => "registerUser",
            Request::GetMe => "getMe",
            Request::GetReceivedGift { .. } => "getReceivedGift",
            Request::GetReceivedGifts { .. } => "getReceivedGifts",
            Request::GetAvailableGifts => "getAvailableGifts",
            Request::UpgradeGift { .. } => "upgradeGift",
            Request::SendGift { .. } => "sendGift",
        }
    }
}
