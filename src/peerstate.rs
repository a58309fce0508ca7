//! Peer state: per-peer encryption state and its evolution rules. Each
//! address has one row in the `peerstates` table; keys are stored as raw
//! key-packet bytes rather than armored text since the table is internal
//! storage, not a wire format.

use anyhow::Result;

use crate::aheader::{AutocryptHeader, PreferEncrypt};
use crate::context::Context;
use crate::key::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptPreference {
    NoPreference,
    Mutual,
    /// The peer used to send Autocrypt headers, mutual or not, and has
    /// since stopped; see [`Peerstate::apply_missing_header`].
    Reset,
}

impl From<PreferEncrypt> for EncryptPreference {
    fn from(value: PreferEncrypt) -> Self {
        match value {
            PreferEncrypt::Mutual => EncryptPreference::Mutual,
            PreferEncrypt::NoPreference => EncryptPreference::NoPreference,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Peerstate {
    pub addr: String,
    pub last_seen: i64,
    pub last_seen_autocrypt: i64,
    pub prefer_encrypt: EncryptPreference,
    pub public_key: Option<Key>,
    pub public_key_fingerprint: Option<String>,
    pub gossip_key: Option<Key>,
    pub gossip_timestamp: i64,
    pub verified_key: Option<Key>,
}

impl Peerstate {
    pub fn new(addr: impl Into<String>) -> Self {
        Peerstate {
            addr: addr.into(),
            last_seen: 0,
            last_seen_autocrypt: 0,
            prefer_encrypt: EncryptPreference::NoPreference,
            public_key: None,
            public_key_fingerprint: None,
            gossip_key: None,
            gossip_timestamp: 0,
            verified_key: None,
        }
    }

    /// A usable public key for sending to this peer: the verified key if
    /// one was established via secure-join-equivalent means, else the
    /// normal Autocrypt public key.
    pub fn usable_public_key(&self) -> Option<&Key> {
        self.verified_key.as_ref().or(self.public_key.as_ref())
    }

    fn fingerprint_of(key: &Key) -> String {
        key.fingerprint()
    }

    /// Applies an incoming `Autocrypt:` header observed at time `t`
    ///. `self` may be
    /// freshly constructed via [`Peerstate::new`] for a peer seen for the
    /// first time.
    pub fn apply_header(&mut self, header: &AutocryptHeader, t: i64) {
        if self.last_seen == 0 {
            // No prior observation: adopt everything at face value.
            self.last_seen = t;
            self.last_seen_autocrypt = t;
            self.set_public_key(header.public_key.clone());
            self.prefer_encrypt = header.prefer_encrypt.into();
        } else if t > self.last_seen {
            self.last_seen = t;
            if t > self.last_seen_autocrypt {
                self.last_seen_autocrypt = t;
                let incoming_pref: EncryptPreference = header.prefer_encrypt.into();
                let key_changed = self
                    .public_key_fingerprint
                    .as_deref()
                    .map(|fp| fp != Self::fingerprint_of(&header.public_key))
                    .unwrap_or(true);
                if key_changed || incoming_pref != self.prefer_encrypt {
                    self.set_public_key(header.public_key.clone());
                    self.prefer_encrypt = incoming_pref;
                }
                // verified_key is never silently downgraded here.
            }
        }
        self.last_seen = self.last_seen.max(t);
    }

    /// Applies the absence of an `Autocrypt:` header on a message
    /// received at time `t`: if the peer had
    /// been sending Autocrypt headers and has now gone quiet for longer
    /// than its last-seen-autocrypt mark, its preference degrades to
    /// `Reset`. `is_multipart_report` messages (e.g. MDNs) never trigger
    /// this, since they are not expected to carry Autocrypt headers.
    pub fn apply_missing_header(&mut self, t: i64, is_multipart_report: bool) {
        if !is_multipart_report && self.last_seen_autocrypt != 0 && t > self.last_seen_autocrypt {
            self.prefer_encrypt = EncryptPreference::Reset;
        }
        self.last_seen = self.last_seen.max(t);
    }

    /// Applies gossiped key material (carried in the encrypted part of a
    /// group message for a third peer), recording it without touching
    /// the Autocrypt-header-derived fields.
    pub fn apply_gossip(&mut self, key: Key, t: i64) {
        if t > self.gossip_timestamp {
            self.gossip_timestamp = t;
            self.gossip_key = Some(key);
        }
    }

    fn set_public_key(&mut self, key: Key) {
        self.public_key_fingerprint = Some(Self::fingerprint_of(&key));
        self.public_key = Some(key);
    }
}

fn encrypt_pref_to_i64(p: EncryptPreference) -> i64 {
    match p {
        EncryptPreference::NoPreference => 0,
        EncryptPreference::Mutual => 1,
        EncryptPreference::Reset => 2,
    }
}

fn encrypt_pref_from_i64(v: i64) -> EncryptPreference {
    match v {
        1 => EncryptPreference::Mutual,
        2 => EncryptPreference::Reset,
        _ => EncryptPreference::NoPreference,
    }
}

/// Loads the persisted peer state for `addr`, or `None` if
/// this peer has never been observed before.
pub async fn load(context: &Context, addr: &str) -> Result<Option<Peerstate>> {
    let addr = addr.to_string();
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT addr, last_seen, last_seen_autocrypt, public_key, public_key_fingerprint,
                            gossip_key, gossip_timestamp, verified_key, prefer_encrypt
                       FROM peerstates WHERE addr=?1",
                    [&addr],
                    |row| {
                        let public_key: Option<Vec<u8>> = row.get(3)?;
                        let gossip_key: Option<Vec<u8>> = row.get(5)?;
                        let verified_key: Option<Vec<u8>> = row.get(7)?;
                        Ok(Peerstate {
                            addr: row.get(0)?,
                            last_seen: row.get(1)?,
                            last_seen_autocrypt: row.get(2)?,
                            public_key: public_key.and_then(|b| Key::from_public_bytes(&b).ok()),
                            public_key_fingerprint: row.get(4)?,
                            gossip_key: gossip_key.and_then(|b| Key::from_public_bytes(&b).ok()),
                            gossip_timestamp: row.get(6)?,
                            verified_key: verified_key.and_then(|b| Key::from_public_bytes(&b).ok()),
                            prefer_encrypt: encrypt_pref_from_i64(row.get(8)?),
                        })
                    },
                )
                .ok())
        })
        .await
}

/// Persists `peerstate`, replacing any previously stored row for its
/// address.
pub async fn save(context: &Context, peerstate: &Peerstate) -> Result<()> {
    let addr = peerstate.addr.clone();
    let last_seen = peerstate.last_seen;
    let last_seen_autocrypt = peerstate.last_seen_autocrypt;
    let public_key = peerstate.public_key.as_ref().map(Key::to_bytes);
    let public_key_fingerprint = peerstate.public_key_fingerprint.clone();
    let gossip_key = peerstate.gossip_key.as_ref().map(Key::to_bytes);
    let gossip_timestamp = peerstate.gossip_timestamp;
    let verified_key = peerstate.verified_key.as_ref().map(Key::to_bytes);
    let prefer_encrypt = encrypt_pref_to_i64(peerstate.prefer_encrypt);
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO peerstates
                    (addr, last_seen, last_seen_autocrypt, public_key, public_key_fingerprint,
                     gossip_key, gossip_timestamp, verified_key, prefer_encrypt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(addr) DO UPDATE SET
                    last_seen=excluded.last_seen,
                    last_seen_autocrypt=excluded.last_seen_autocrypt,
                    public_key=excluded.public_key,
                    public_key_fingerprint=excluded.public_key_fingerprint,
                    gossip_key=excluded.gossip_key,
                    gossip_timestamp=excluded.gossip_timestamp,
                    verified_key=excluded.verified_key,
                    prefer_encrypt=excluded.prefer_encrypt",
                rusqlite::params![
                    addr,
                    last_seen,
                    last_seen_autocrypt,
                    public_key,
                    public_key_fingerprint,
                    gossip_key,
                    gossip_timestamp,
                    verified_key,
                    prefer_encrypt,
                ],
            )?;
            Ok(())
        })
        .await
}

/// Loads the peer state for `addr`, creating a fresh unestablished one if
/// none is stored yet — the usual entry point for the MIME parser, which
/// always wants a `Peerstate` to apply an observation to.
pub async fn load_or_new(context: &Context, addr: &str) -> Result<Peerstate> {
    Ok(load(context, addr).await?.unwrap_or_else(|| Peerstate::new(addr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;

    const RAWKEY: &str = "xsBNBFzG3j0BCAC6iNhT8zydvCXi8LI/gFnkadMbfmSE/rTJskRRra/utGbLyDta/yTrJgWL7O3y/g4HdDW/dN2z26Y6W13IMzx9gLInn1KQZChtqWAcr/ReUucXcymwcfg1mdkBGk3TSLeLihN6CJx8Wsv8ig+kgAzte4f5rqEEAJVQ9WZHuti7UiYs6oRzqTo06CRe9owVXxzdMf0VDQtf7ZFm9dpzKKbhH7Lu8880iiotQ9/yRCkDGp9fNThsrLdZiK6OIAcIBAqi2rI89aS1dAmnRbktQieCx5izzyYkR1KvVL3gTTllHOzfKVEC2asmtWu2e4se/+O4WMIS1eGrn7GeWVb0Vwc5ABEBAAHNETxhQEBiLmV4YW1wbGUuZGU+wsCJBBABCAAzAhkBBQJcxt5FAhsDBAsJCAcGFQgJCgsCAxYCARYhBI4xxYKBgH3ANh5cufaKrc9mtiMLAAoJEPaKrc9mtiML938H/18F+3Wf9/JaAy/8hCO1v4S2PVBhxaKCokaNFtkfaMRne2l087LscCFPiFNyb4mv6Z3YeK8Xpxlp2sI0ecvdiqLUOGfnxS6tQrj+83EjtIrZ/hXOk1h121QFWH9Zg2VNHtODXjAgdLDC0NWUrclR0ZOqEDQHeo0ibTILdokVfXFN25wakPmGaYJP2y729cb1ve7RzvIvwn+Dddfxo3ao72rBfLi7l4NQ4S0KsY4cw+/6l5bRCKYCP77wZtvCwUvfVVosLdT43agtSiBI49+ayqvZ8OCvSJa61i+v81brTiEy9GBod4eAp45Ibsuemkw+gon4ZOvUXHTjwFB+h63MrozOwE0EXMbePQEIAL/vauf1zK8JgCu3V+G+SOX0iWw5xUlCPX+ERpBbWfwu3uAqn4wYXD3JDE/fVAF668xiV4eTPtlSUd5h0mn+G7uXMMOtkb+20SoEt50f8zw8TrL9t+ZsV11GKZWJpCar5AhXWsn6EEi8I2hLL5vn55ZZmHuGgN4jjmkRl3ToKCLhaXwTBjCJem7N5EH7F75wErEITa55v4Lb4Nfca7vnvtYrI1OA446xa8gHra0SINelTD09/JM/Fw4sWVPBaRZmJK/Tnu79N23No9XBUubmFPv1pNexZsQclicnTpt/BEWhiun7d6lfGB63K1aoHRTR1pcrWvBuALuuz0gqar2zlI0AEQEAAcLAdgQYAQgAIAUCXMbeRQIbDBYhBI4xxYKBgH3ANh5cufaKrc9mtiMLAAoJEPaKrc9mtiMLKSEIAIyLCRO2OyZ0IYRvRPpMn4p7E+7Pfcz/0mSkOy+1hshgJnqivXurm8zwGrwdMqeV4eslKR9H1RUdWGUQJNbtwmmjrt5DHpIhYHl5t3FpCBaGbV20Omo00Q38lBl9MtrmZkZw+ktEk6X+0xCKssMF+2MADkSOIufbR5HrDVB89VZOHCO9DeXvCUUAw2hyJiL/LHmLzJ40zYoTmb+F//f0k0j+tRdbkefyRoCmwG7YGiT+2hnCdgcezswnzah5J3ZKlrg7jOGo1LxtbvNUzxNBbC6S/aNgwm6qxo7xegRhmEl5uZ16zwyj4qz+xkjGy25Of5mWfUDoNw7OT7sjUbHOOMc=";

    fn header(prefer: PreferEncrypt) -> AutocryptHeader {
        let key = Key::from_base64(KeyType::Public, RAWKEY).unwrap();
        AutocryptHeader::new("peer@example.org".into(), key, prefer)
    }

    #[test]
    fn first_observation_adopts_header_verbatim() {
        let mut ps = Peerstate::new("peer@example.org");
        ps.apply_header(&header(PreferEncrypt::Mutual), 1000);
        assert_eq!(ps.last_seen, 1000);
        assert_eq!(ps.last_seen_autocrypt, 1000);
        assert_eq!(ps.prefer_encrypt, EncryptPreference::Mutual);
        assert!(ps.public_key.is_some());
    }

    #[test]
    fn missing_header_after_autocrypt_activity_resets_preference() {
        let mut ps = Peerstate::new("peer@example.org");
        ps.apply_header(&header(PreferEncrypt::Mutual), 1000);
        ps.apply_missing_header(2000, false);
        assert_eq!(ps.prefer_encrypt, EncryptPreference::Reset);
        // Key material survives the downgrade.
        assert!(ps.public_key.is_some());
    }

    #[test]
    fn missing_header_on_report_message_does_not_reset() {
        let mut ps = Peerstate::new("peer@example.org");
        ps.apply_header(&header(PreferEncrypt::Mutual), 1000);
        ps.apply_missing_header(2000, true);
        assert_eq!(ps.prefer_encrypt, EncryptPreference::Mutual);
    }

    #[test]
    fn last_seen_only_moves_forward() {
        let mut ps = Peerstate::new("peer@example.org");
        ps.apply_header(&header(PreferEncrypt::Mutual), 1000);
        ps.apply_header(&header(PreferEncrypt::Mutual), 500);
        assert_eq!(ps.last_seen, 1000);
    }

    async fn test_context() -> Context {
        let dir = tempfile::tempdir().unwrap();
        Context::new_in_memory(
            std::sync::Arc::new(crate::crypto::test_support::FakeCrypto::default()),
            dir.path().to_path_buf(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_address_loads_as_none() {
        let ctx = test_context().await;
        assert!(load(&ctx, "nobody@example.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_load_roundtrips_all_fields() {
        let ctx = test_context().await;
        let mut ps = Peerstate::new("peer@example.org");
        ps.apply_header(&header(PreferEncrypt::Mutual), 1000);
        save(&ctx, &ps).await.unwrap();

        let loaded = load(&ctx, "peer@example.org").await.unwrap().unwrap();
        assert_eq!(loaded.last_seen, 1000);
        assert_eq!(loaded.last_seen_autocrypt, 1000);
        assert_eq!(loaded.prefer_encrypt, EncryptPreference::Mutual);
        assert_eq!(loaded.public_key_fingerprint, ps.public_key_fingerprint);
        assert!(loaded.public_key.is_some());

        // A later save for the same address replaces the row, not adds one.
        ps.apply_missing_header(2000, false);
        save(&ctx, &ps).await.unwrap();
        let loaded = load(&ctx, "peer@example.org").await.unwrap().unwrap();
        assert_eq!(loaded.prefer_encrypt, EncryptPreference::Reset);
    }

    #[tokio::test]
    async fn load_or_new_never_fails_on_a_cold_address() {
        let ctx = test_context().await;
        let ps = load_or_new(&ctx, "cold@example.org").await.unwrap();
        assert_eq!(ps.addr, "cold@example.org");
        assert_eq!(ps.last_seen, 0);
    }
}
