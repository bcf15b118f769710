//! Object model, correlation id spaces, and JSON-lines framing for gift-snipe.
//!
//! This crate defines what travels between the client and the remote
//! messaging platform: outbound [`Request`]s, inbound [`Object`]s wrapped in
//! [`Frame`]s, and the three disjoint correlation id spaces ([`IdSpace`])
//! that decide how an inbound frame is routed.
//!
//! ## Features
//!
//! - **Tagged objects**: every request and reply carries an `@type` tag
//! - **Explicit id spaces**: push (`0`), pinned [`Sentinel`] ids, monotonic ids
//! - **JSON-lines codec**: one frame per line, correlation id in `@extra`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod id;
pub mod object;
pub mod request;

// Re-export main types
pub use codec::{decode_frame, encode_request, DEFAULT_MAX_LINE, EXTRA_FIELD, UNDECODABLE_REPLY};
pub use error::WireError;
pub use id::{IdSpace, Sentinel, MONOTONIC_CEILING, PUSH_ID};
pub use object::{
    AuthorizationState, AvailableGift, AvailableGifts, FormattedText, Frame, Gift, GiftAttribute,
    GiftPurchaseLimits, Message, MessageContent, Object, PushEvent, ReceivedGift, ReceivedGifts,
    RemoteError, SentGift, UpgradeGiftResult, UpgradedGift, User,
};
pub use request::{MessageSender, Request, SessionParameters};
