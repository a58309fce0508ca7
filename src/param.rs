//! Parameter bag: a packed `key=value\n` string attached to messages,
//! chats and jobs, addressable by single-octet keys.

use std::collections::BTreeMap;
use std::fmt;

/// Single-octet parameter keys, drawn from a fixed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Key {
    File = b'f',
    Width = b'w',
    Height = b'h',
    Duration = b'd',
    MimeType = b'm',
    AuthorName = b'N',
    TrackName = b'n',
    Forwarded = b'a',
    Unpromoted = b'U',
    ProfileImage = b'i',
    SelfTalk = b'K',
    Cmd = b'C',
    CmdArg = b'1',
    CmdArg2 = b'2',
    Error = b'E',
    GuaranteeE2ee = b'c',
    ErroneousE2ee = b'e',
    ForcePlaintext = b'u',
    WantsMdn = b'r',
    Times = b'T',
    ServerFolder = b'Z',
    ServerUid = b'z',
    /// `\x1e`-joined envelope recipient list, attached to `SEND_MSG_TO_SMTP`/
    /// `SEND_MDN` jobs alongside the rendered [`Key::File`].
    Recipients = b'R',
}

impl Key {
    fn from_u8(byte: u8) -> Option<Self> {
        use Key::*;
        Some(match byte {
            b'f' => File,
            b'w' => Width,
            b'h' => Height,
            b'd' => Duration,
            b'm' => MimeType,
            b'N' => AuthorName,
            b'n' => TrackName,
            b'a' => Forwarded,
            b'U' => Unpromoted,
            b'i' => ProfileImage,
            b'K' => SelfTalk,
            b'C' => Cmd,
            b'1' => CmdArg,
            b'2' => CmdArg2,
            b'E' => Error,
            b'c' => GuaranteeE2ee,
            b'e' => ErroneousE2ee,
            b'u' => ForcePlaintext,
            b'r' => WantsMdn,
            b'T' => Times,
            b'Z' => ServerFolder,
            b'z' => ServerUid,
            b'R' => Recipients,
            _ => return None,
        })
    }
}

/// A packed set of key/value pairs, serialized as `k=v\n` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<Key, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: Key) -> Option<&str> {
        self.0.get(&key).map(|s| s.as_str())
    }

    pub fn get_int(&self, key: Key, default: i64) -> i64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: Key) -> bool {
        self.get_int(key, 0) != 0
    }

    pub fn exists(&self, key: Key) -> bool {
        self.0.contains_key(&key)
    }

    /// Sets `key` to `value`; whitespace and `=` in either are rejected
    /// since the packed form cannot represent them.
    pub fn set(&mut self, key: Key, value: impl Into<String>) -> anyhow::Result<()> {
        let value = value.into();
        anyhow::ensure!(
            !value.chars().any(|c| c == '=' || c.is_whitespace()),
            "parameter value for {key:?} contains '=' or whitespace"
        );
        if value.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
        Ok(())
    }

    pub fn set_int(&mut self, key: Key, value: i64) {
        self.0.insert(key, value.to_string());
    }

    /// Setting to `None` removes the key.
    pub fn remove(&mut self, key: Key) {
        self.0.remove(&key);
    }

    pub fn pack(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.0 {
            debug_assert!(!value.is_empty(), "packed form must never carry empty values");
            out.push(key_to_char(*key));
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Parses a packed string, silently dropping malformed lines
    ///.
    pub fn unpack(s: &str) -> Self {
        let mut map = BTreeMap::new();
        for line in s.lines() {
            let Some((k, v)) = line.split_once('=') else {
                continue;
            };
            let mut chars = k.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                continue;
            };
            let Some(key) = Key::from_u8(c as u8) else {
                continue;
            };
            if v.is_empty() {
                continue;
            }
            map.insert(key, v.to_string());
        }
        Params(map)
    }
}

fn key_to_char(key: Key) -> char {
    key as u8 as char
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pack())
    }
}
