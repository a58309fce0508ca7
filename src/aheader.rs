//! Autocrypt header: parse/render the `Autocrypt:` header.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context as _, Result};

use crate::key::{Key, KeyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferEncrypt {
    #[default]
    NoPreference,
    Mutual,
}

impl fmt::Display for PreferEncrypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreferEncrypt::NoPreference => "nopreference",
            PreferEncrypt::Mutual => "mutual",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AutocryptHeader {
    pub addr: String,
    pub prefer_encrypt: PreferEncrypt,
    pub public_key: Key,
}

impl AutocryptHeader {
    pub fn new(addr: String, public_key: Key, prefer_encrypt: PreferEncrypt) -> Self {
        AutocryptHeader {
            addr,
            prefer_encrypt,
            public_key,
        }
    }
}

impl FromStr for AutocryptHeader {
    type Err = anyhow::Error;

    /// Parses an `Autocrypt:` header value. Tolerant of RFC 5322 header
    /// folding (extra whitespace around `;` and `=`). Unknown attributes
    /// whose name starts with `_` are ignored; any other unknown
    /// attribute invalidates the whole header.
    fn from_str(raw: &str) -> Result<Self> {
        let mut attrs: BTreeMap<String, String> = BTreeMap::new();
        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            attrs.insert(key.trim().to_string(), value.trim().to_string());
        }

        let addr = attrs.remove("addr").context("Autocrypt header is missing addr")?;

        let keydata = attrs
            .remove("keydata")
            .context("Autocrypt header is missing keydata")?
            .split_whitespace()
            .collect::<String>();
        let public_key =
            Key::from_base64(KeyType::Public, &keydata).context("keydata does not decode to a valid key")?;

        let prefer_encrypt = match attrs.remove("prefer-encrypt").as_deref() {
            Some("mutual") => PreferEncrypt::Mutual,
            _ => PreferEncrypt::NoPreference,
        };

        if let Some(unknown) = attrs.keys().find(|k| !k.starts_with('_')) {
            bail!("unknown critical Autocrypt attribute: {unknown}");
        }

        Ok(AutocryptHeader {
            addr,
            prefer_encrypt,
            public_key,
        })
    }
}

impl fmt::Display for AutocryptHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr={}; ", self.addr)?;
        if self.prefer_encrypt == PreferEncrypt::Mutual {
            write!(f, "prefer-encrypt=mutual; ")?;
        }
        write!(f, "keydata={}", wrap_keydata(&self.public_key.to_base64()))
    }
}

/// Inserts a space every 78 columns so the RFC 5322 folding algorithm a
/// mail library applies downstream has somewhere to break the line
///.
fn wrap_keydata(b64: &str) -> String {
    const PREFIX_LEN: usize = "keydata=".len();
    let mut out = String::with_capacity(b64.len() + b64.len() / 78);
    for (i, c) in b64.chars().enumerate() {
        if i > 0 && (i + PREFIX_LEN) % 78 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
