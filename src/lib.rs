//! postbox-core: an email-transport chat engine.
//!
//! Turns a standard IMAP mailbox plus SMTP submission endpoint into a
//! bidirectional, end-to-end-encrypted messenger. One [`Context`] is one
//! configured account; peers running any Autocrypt-compliant mail client
//! can participate, while two engine instances get chats, groups and
//! attachments on top of plain email.

#[macro_use]
pub mod events;

pub mod aheader;
pub mod blob;
pub mod chat;
pub mod config;
pub mod configure;
pub mod constants;
pub mod contact;
pub mod context;
pub mod crypto;
pub mod imap;
pub mod imex;
pub mod job;
pub mod key;
pub mod keypair;
pub mod keyring;
pub mod login_param;
pub mod message;
pub mod mimefactory;
pub mod mimeparser;
pub mod param;
pub mod peerstate;
pub mod scheduler;
pub mod simplify;
pub mod smtp;
pub mod sql;
pub mod tools;

pub use context::Context;
pub use events::{Event, EventEmitter};
