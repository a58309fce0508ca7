//! Key + Keyring: typed public/private key blobs, ASCII-armor
//! render/parse, fingerprinting, equality.
//!
//! Built over the `pgp` crate's `SignedPublicKey`/`SignedSecretKey`.

use std::io::Cursor;

use anyhow::{bail, Context as _, Result};
use pgp::composed::{
    Deserializable, SignedPublicKey as PgpPublicKey, SignedSecretKey as PgpSecretKey,
};
use pgp::ser::Serialize as PgpSerialize;
use pgp::types::KeyTrait;

/// Which half of a keypair a [`Key`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Public,
    Private,
}

/// A parsed OpenPGP key, public or private half.
#[derive(Debug, Clone)]
pub enum Key {
    Public(PgpPublicKey),
    Private(PgpSecretKey),
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Public(a), Key::Public(b)) => a.to_armored_bytes(None).ok() == b.to_armored_bytes(None).ok(),
            (Key::Private(a), Key::Private(b)) => a.to_armored_bytes(None).ok() == b.to_armored_bytes(None).ok(),
            _ => false,
        }
    }
}

impl Key {
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Public(_) => KeyType::Public,
            Key::Private(_) => KeyType::Private,
        }
    }

    pub fn from_public_bytes(bytes: &[u8]) -> Result<Self> {
        let key = PgpPublicKey::from_bytes(Cursor::new(bytes)).context("parsing public key")?;
        Ok(Key::Public(key))
    }

    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self> {
        let key = PgpSecretKey::from_bytes(Cursor::new(bytes)).context("parsing private key")?;
        Ok(Key::Private(key))
    }

    pub fn from_base64(type_: KeyType, data: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .context("invalid base64 key data")?;
        match type_ {
            KeyType::Public => Self::from_public_bytes(&bytes),
            KeyType::Private => Self::from_private_bytes(&bytes),
        }
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let result = match self {
            Key::Public(k) => k.to_writer(&mut buf),
            Key::Private(k) => k.to_writer(&mut buf),
        };
        result.expect("writing to a Vec<u8> never fails");
        buf
    }

    /// Renders ASCII-armor per RFC 4880 §6, with an optional CRC-24
    /// checksum line.
    pub fn to_armored(&self, with_checksum: bool) -> Result<String> {
        let bytes = self.to_bytes();
        let block_type = match self {
            Key::Public(_) => "PGP PUBLIC KEY BLOCK",
            Key::Private(_) => "PGP PRIVATE KEY BLOCK",
        };
        Ok(render_armor(block_type, &bytes, with_checksum))
    }

    pub fn from_armored(data: &str) -> Result<Self> {
        let (block_type, bytes) = parse_armor(data)?;
        match block_type.as_str() {
            "PGP PUBLIC KEY BLOCK" => Self::from_public_bytes(&bytes),
            "PGP PRIVATE KEY BLOCK" => Self::from_private_bytes(&bytes),
            other => bail!("unsupported armor block type {other}"),
        }
    }

    /// Uppercase hex fingerprint, no separators.
    pub fn fingerprint(&self) -> String {
        let raw: Vec<u8> = match self {
            Key::Public(k) => k.fingerprint(),
            Key::Private(k) => k.fingerprint(),
        };
        hex::encode_upper(raw)
    }

}

/// Formats a fingerprint the way a human reads it: groups of 4, a line
/// break every 20 hex characters.
pub fn format_fingerprint(fp: &str) -> String {
    let fp = fp.to_uppercase();
    let mut out = String::new();
    for (i, c) in fp.chars().enumerate() {
        if i != 0 && i % 20 == 0 {
            out.push('\n');
        } else if i != 0 && i % 4 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

/// Inverse of [`format_fingerprint`]: strips everything but hex digits and
/// uppercases.
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase()
}

fn render_armor(block_type: &str, bytes: &[u8], with_checksum: bool) -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    let mut out = format!("-----BEGIN {block_type}-----\n\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    if with_checksum {
        let crc = crc24(bytes);
        let crc_bytes = [(crc >> 16) as u8, (crc >> 8) as u8, crc as u8];
        out.push('=');
        out.push_str(&base64::engine::general_purpose::STANDARD.encode(crc_bytes));
        out.push('\n');
    }
    out.push_str(&format!("-----END {block_type}-----\n"));
    out
}

fn parse_armor(data: &str) -> Result<(String, Vec<u8>)> {
    use base64::Engine;
    let begin = data.find("-----BEGIN ").context("no armor header found")?;
    let rest = &data[begin + "-----BEGIN ".len()..];
    let end_of_type = rest.find("-----").context("malformed armor header")?;
    let block_type = rest[..end_of_type].trim().to_string();
    let body_start = begin + "-----BEGIN ".len() + end_of_type + "-----".len();
    let end_marker = format!("-----END {block_type}-----");
    let end = data.find(&end_marker).context("no armor footer found")?;
    let body = &data[body_start..end];

    let mut b64 = String::new();
    let mut checksum_line: Option<&str> = None;
    let mut seen_blank = false;
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            seen_blank = true;
            continue;
        }
        if !seen_blank {
            // armor headers like "Version:"; skip until blank line
            continue;
        }
        if let Some(stripped) = line.strip_prefix('=') {
            checksum_line = Some(stripped);
            continue;
        }
        b64.push_str(line);
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .context("invalid base64 in armor body")?;
    if let Some(checksum) = checksum_line {
        let expected = base64::engine::general_purpose::STANDARD
            .decode(checksum)
            .context("invalid base64 checksum")?;
        if expected.len() == 3 {
            let want = ((expected[0] as u32) << 16) | ((expected[1] as u32) << 8) | expected[2] as u32;
            if crc24(&bytes) != want {
                bail!("armor checksum mismatch");
            }
        }
    }
    Ok((block_type, bytes))
}

/// CRC-24 per RFC 4880 §6.1 (the "Radix-64" checksum).
fn crc24(data: &[u8]) -> u32 {
    const CRC24_INIT: u32 = 0x00B7_04CE;
    const CRC24_POLY: u32 = 0x0186_4CFB;
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}
