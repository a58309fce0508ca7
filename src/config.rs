//! Typed configuration keys layered over the generic key/value table in
//! storage.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::sql::Sql;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Config {
    Addr,
    MailServer,
    MailPort,
    MailUser,
    MailPw,
    SendServer,
    SendPort,
    SendUser,
    SendPw,
    ServerFlags,
    Displayname,
    Selfstatus,
    E2eeEnabled,
    MdnsEnabled,
    SaveEml,
    Configured,
    ConfiguredAddr,
    ConfiguredMailServer,
    ConfiguredMailPort,
    ConfiguredMailUser,
    ConfiguredMailPw,
    ConfiguredSendServer,
    ConfiguredSendPort,
    ConfiguredSendUser,
    ConfiguredSendPw,
    ConfiguredServerFlags,
    /// Per-folder IMAP UID high-water mark: `imap.mailbox.<folder>`.
    ImapMailbox(String),
    /// Unix timestamp of the last backup export, persisted inside the
    /// backup archive itself.
    BackupTime,
    /// Blob directory a backup archive was exported from, persisted inside
    /// the archive.
    BackupFor,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Config::*;
        let s = match self {
            Addr => "addr",
            MailServer => "mail_server",
            MailPort => "mail_port",
            MailUser => "mail_user",
            MailPw => "mail_pw",
            SendServer => "send_server",
            SendPort => "send_port",
            SendUser => "send_user",
            SendPw => "send_pw",
            ServerFlags => "server_flags",
            Displayname => "displayname",
            Selfstatus => "selfstatus",
            E2eeEnabled => "e2ee_enabled",
            MdnsEnabled => "mdns_enabled",
            SaveEml => "save_eml",
            Configured => "configured",
            ConfiguredAddr => "configured_addr",
            ConfiguredMailServer => "configured_mail_server",
            ConfiguredMailPort => "configured_mail_port",
            ConfiguredMailUser => "configured_mail_user",
            ConfiguredMailPw => "configured_mail_pw",
            ConfiguredSendServer => "configured_send_server",
            ConfiguredSendPort => "configured_send_port",
            ConfiguredSendUser => "configured_send_user",
            ConfiguredSendPw => "configured_send_pw",
            ConfiguredServerFlags => "configured_server_flags",
            ImapMailbox(folder) => return write!(f, "imap.mailbox.{folder}"),
            BackupTime => "backup_time",
            BackupFor => "backup_for",
        };
        f.write_str(s)
    }
}

impl Config {
    /// Default value returned by [`crate::context::Context::get_config`]
    /// when the key has never been set.
    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            Config::E2eeEnabled => Some("1"),
            Config::MdnsEnabled => Some("1"),
            _ => None,
        }
    }
}

/// Bitfield stored in `server_flags`/`configured_server_flags`
///.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerFlags(pub u64);

impl ServerFlags {
    pub const AUTH_OAUTH2: u64 = 0x2;
    pub const AUTH_NORMAL: u64 = 0x4;
    pub const IMAP_SOCKET_SSL: u64 = 0x100;
    pub const IMAP_SOCKET_STARTTLS: u64 = 0x200;
    pub const IMAP_SOCKET_PLAIN: u64 = 0x400;
    pub const SMTP_SOCKET_SSL: u64 = 0x10000;
    pub const SMTP_SOCKET_STARTTLS: u64 = 0x20000;
    pub const SMTP_SOCKET_PLAIN: u64 = 0x40000;
    /// Gmail special case: no attempt to also poll the
    /// separately-synced "All Mail" folder for uploads.
    pub const NO_EXTRA_IMAP_UPLOAD: u64 = 0x2_0000_0000;
    /// Gmail special case: never try to MOVE messages into "Chats"
    /// (Gmail's labels-as-folders model makes MOVE lossy).
    pub const NO_MOVE_TO_CHATS: u64 = 0x4_0000_0000;

    pub fn has(self, flag: u64) -> bool {
        self.0 & flag != 0
    }
}

/// Reads a namespaced config value as an integer, falling back to
/// `default` if unset or unparsable.
pub async fn get_config_int(sql: &Sql, key: Config, default: i64) -> i64 {
    sql.get_raw_config(&key.to_string())
        .await
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub async fn get_config_bool(sql: &Sql, key: Config, default: bool) -> bool {
    get_config_int(sql, key, default as i64).await != 0
}

/// Parses `value:last_seen_uid`, as stored for `imap.mailbox.<folder>`
///.
pub fn parse_uid_marker(raw: &str) -> Result<(u32, u32)> {
    let Some((validity, last_seen)) = raw.split_once(':') else {
        bail!("malformed imap.mailbox marker: {raw}");
    };
    Ok((u32::from_str(validity)?, u32::from_str(last_seen)?))
}

pub fn format_uid_marker(uidvalidity: u32, last_seen_uid: u32) -> String {
    format!("{uidvalidity}:{last_seen_uid}")
}
