//! Sentinel IDs and small fixed enumerations shared across modules.
//!
//! Kept as one module (rather
//! than scattered `impl` blocks) because several of the sentinel ranges
//! (contact, chat, message) are compared against each other at call sites.

/// Contact sentinels.
pub const DC_CONTACT_ID_SELF: u32 = 1;
pub const DC_CONTACT_ID_DEVICE: u32 = 2;
pub const DC_CONTACT_ID_LAST_SPECIAL: u32 = 9;

/// Chat sentinels (virtual chats, synthesized on read).
pub const DC_CHAT_ID_DEADDROP: u32 = 1;
pub const DC_CHAT_ID_TRASH: u32 = 3;
pub const DC_CHAT_ID_MSGS_IN_CREATION: u32 = 4;
pub const DC_CHAT_ID_STARRED: u32 = 5;
pub const DC_CHAT_ID_ARCHIVED_LINK: u32 = 6;
pub const DC_CHAT_ID_LAST_SPECIAL: u32 = 9;

/// Message sentinels.
pub const DC_MSG_ID_DAYMARKER: u32 = 9;
pub const DC_MSG_ID_MARKER1: u32 = 8;
pub const DC_MSG_ID_LAST_SPECIAL: u32 = 9;

/// A job may be retried at most this many times while the device is
/// online before it is given up on.
pub const MAX_JOB_RETRIES: u32 = 3;

/// Cap on fixed-point re-traversal of nested `multipart/encrypted` parts
///.
pub const MAX_DECRYPT_ITERATIONS: u32 = 10;

/// Cap on uuencoded blobs extracted from a single `text/plain` body
///.
pub const MAX_UUENCODED_PARTS: usize = 50;
