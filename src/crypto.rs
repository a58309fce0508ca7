//! Crypto capability: the interface the engine consumes from an
//! OpenPGP implementation. The engine core never talks to
//! the `pgp` crate directly outside of this module and `key.rs`'s armor
//! helpers, so a deterministic fake can stand in for tests.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use pgp::composed::{
    KeyType as PgpKeyType, Message as PgpMessage, SecretKeyParamsBuilder,
    SignedPublicKey as PgpPublicKey, SignedSecretKey as PgpSecretKey,
};
use pgp::crypto::{hash::HashAlgorithm, sym::SymmetricKeyAlgorithm};
use pgp::types::{KeyTrait, PublicKeyTrait, SecretKeyTrait};
use rand::rngs::OsRng;

use crate::key::Key;
use crate::keyring::Keyring;

/// Result of a `pk_decrypt` call: the recovered plaintext plus the
/// fingerprints of every keyring key whose signature verified
///.
pub struct DecryptResult {
    pub plaintext: Vec<u8>,
    pub signature_fingerprints: Vec<String>,
}

#[async_trait]
pub trait Crypto: Send + Sync {
    /// Generates a keypair: a primary signing key plus an encryption
    /// subkey, self-signed, with SHA-256-first key preferences
    ///.
    async fn generate_keypair(&self, user_id: &str) -> Result<(Key, Key)>;

    /// Confirms the buffer parses as at least one key of the matching
    /// type.
    fn is_valid(&self, key: &Key) -> bool;

    fn fingerprint(&self, key: &Key) -> String {
        key.fingerprint()
    }

    /// Extracts the embedded public component from a private key.
    fn split_public(&self, private: &Key) -> Result<Key>;

    /// Signs (if `signing_key` is given) then encrypts `plaintext` to
    /// every public key in `recipients`, returning ASCII-armored
    /// ciphertext.
    fn pk_encrypt(
        &self,
        plaintext: &[u8],
        recipients: &Keyring,
        signing_key: Option<&Key>,
    ) -> Result<String>;

    /// Decrypts `ciphertext` with `private_keys`, optionally validating
    /// the embedded signature against `validation_keys`.
    fn pk_decrypt(
        &self,
        ciphertext: &[u8],
        private_keys: &Keyring,
        validation_keys: Option<&Keyring>,
    ) -> Result<DecryptResult>;

    /// Symmetrically encrypts `plaintext` with `passphrase`
    /// (AES-128, iterated+salted S2K, SHA-256), per the Autocrypt Setup
    /// Message protocol.
    fn sym_encrypt_setup(&self, plaintext: &[u8], passphrase: &str) -> Result<String>;

    fn sym_decrypt_setup(&self, ciphertext: &str, passphrase: &str) -> Result<Vec<u8>>;
}

/// Default implementation backed by the `pgp` crate.
pub struct RPgpCrypto;

#[async_trait]
impl Crypto for RPgpCrypto {
    async fn generate_keypair(&self, user_id: &str) -> Result<(Key, Key)> {
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || generate_keypair_blocking(&user_id))
            .await
            .context("keygen task panicked")?
    }

    fn is_valid(&self, key: &Key) -> bool {
        match key {
            Key::Public(k) => k.verify().is_ok(),
            Key::Private(k) => k.verify().is_ok(),
        }
    }

    fn split_public(&self, private: &Key) -> Result<Key> {
        let Key::Private(secret) = private else {
            bail!("split_public requires a private key");
        };
        // Re-derive the public half by re-signing the embedded public
        // key material with the same secret key.
        let public_unsigned = secret.public_key();
        let signed = public_unsigned
            .sign(secret, String::new)
            .context("re-signing public key")?;
        Ok(Key::Public(signed))
    }

    fn pk_encrypt(
        &self,
        plaintext: &[u8],
        recipients: &Keyring,
        signing_key: Option<&Key>,
    ) -> Result<String> {
        let recipient_keys: Vec<PgpPublicKey> = recipients
            .public_keys()
            .filter_map(|k| match k {
                Key::Public(pk) => Some(pk.clone()),
                Key::Private(_) => None,
            })
            .collect();
        anyhow::ensure!(!recipient_keys.is_empty(), "no recipient public keys given");

        let payload = if let Some(Key::Private(signer)) = signing_key {
            let literal = PgpMessage::new_literal_bytes("", plaintext);
            literal
                .sign(signer, String::new, HashAlgorithm::SHA2_256)
                .context("signing message")?
        } else {
            PgpMessage::new_literal_bytes("", plaintext)
        };

        let mut rng = OsRng;
        let encrypted = payload
            .encrypt_to_keys(
                &mut rng,
                SymmetricKeyAlgorithm::AES256,
                &recipient_keys.iter().collect::<Vec<_>>(),
            )
            .context("encrypting message")?;
        encrypted.to_armored_string(None).context("armoring ciphertext")
    }

    fn pk_decrypt(
        &self,
        ciphertext: &[u8],
        private_keys: &Keyring,
        validation_keys: Option<&Keyring>,
    ) -> Result<DecryptResult> {
        let msg = PgpMessage::from_bytes(std::io::Cursor::new(ciphertext))
            .context("parsing PGP message")?;

        let secrets: Vec<&PgpSecretKey> = private_keys
            .iter()
            .filter_map(|k| match k {
                Key::Private(sk) => Some(sk),
                Key::Public(_) => None,
            })
            .collect();
        anyhow::ensure!(!secrets.is_empty(), "no private keys available to decrypt with");

        let mut last_err = None;
        for secret in &secrets {
            match msg.decrypt(String::new, &[secret]) {
                Ok((decrypted, _)) => {
                    let plaintext = decrypted
                        .get_content()
                        .context("reading decrypted content")?
                        .unwrap_or_default();

                    let mut signature_fingerprints = Vec::new();
                    if let Some(validators) = validation_keys {
                        for v in validators.public_keys() {
                            if let Key::Public(pk) = v {
                                if decrypted.verify(pk).is_ok() {
                                    signature_fingerprints.push(hex::encode_upper(pk.fingerprint()));
                                }
                            }
                        }
                    }

                    return Ok(DecryptResult {
                        plaintext,
                        signature_fingerprints,
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(anyhow::anyhow!(
            "decryption failed with all available private keys: {:?}",
            last_err
        ))
    }

    fn sym_encrypt_setup(&self, plaintext: &[u8], passphrase: &str) -> Result<String> {
        let literal = PgpMessage::new_literal_bytes("", plaintext);
        let mut rng = OsRng;
        let encrypted = literal
            .encrypt_with_password(&mut rng, SymmetricKeyAlgorithm::AES128, || {
                passphrase.to_string()
            })
            .context("symmetric encryption failed")?;
        encrypted.to_armored_string(None).context("armoring setup message")
    }

    fn sym_decrypt_setup(&self, ciphertext: &str, passphrase: &str) -> Result<Vec<u8>> {
        let msg = PgpMessage::from_string(ciphertext).context("parsing setup message")?;
        let (decrypted, _) = msg
            .decrypt_with_password(|| passphrase.to_string())
            .context("wrong setup code or corrupt setup message")?;
        decrypted
            .get_content()
            .context("reading decrypted content")?
            .context("setup message had no content")
    }
}

fn generate_keypair_blocking(user_id: &str) -> Result<(Key, Key)> {
    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(PgpKeyType::Rsa(3072))
        .can_create_certificates(true)
        .can_sign(true)
        .primary_user_id(user_id.to_string())
        .preferred_symmetric_algorithms(vec![SymmetricKeyAlgorithm::AES256].into())
        .preferred_hash_algorithms(vec![HashAlgorithm::SHA2_256].into())
        .subkey(PgpKeyType::Rsa(3072), true, false);
    let params = key_params.build().context("building keygen params")?;
    let secret_key_unsigned = params.generate().context("generating secret key")?;
    let secret_key = secret_key_unsigned
        .sign(String::new)
        .context("self-signing secret key")?;
    let public_key = secret_key
        .public_key()
        .sign(&secret_key, String::new)
        .context("signing public key")?;
    Ok((Key::Private(secret_key), Key::Public(public_key)))
}

#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    //! A deterministic crypto fake for unit tests that never pays the
    //! cost of a real RSA keygen. It tags plaintext with the keyring it
    //! "encrypted" to instead of doing real PGP framing, which is enough
    //! to exercise the ingestion/send pipelines' control flow.
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    pub struct FakeCrypto {
        counter: AtomicU64,
    }

    impl Default for FakeCrypto {
        fn default() -> Self {
            Self { counter: AtomicU64::new(0) }
        }
    }

    #[async_trait]
    impl Crypto for FakeCrypto {
        async fn generate_keypair(&self, user_id: &str) -> Result<(Key, Key)> {
            let _ = user_id;
            bail!("FakeCrypto cannot generate real PGP keys; inject pre-built fixtures instead")
        }

        fn is_valid(&self, _key: &Key) -> bool {
            true
        }

        fn split_public(&self, private: &Key) -> Result<Key> {
            match private {
                Key::Private(_) => bail!("FakeCrypto fixtures should supply paired keys directly"),
                Key::Public(_) => bail!("split_public requires a private key"),
            }
        }

        fn pk_encrypt(
            &self,
            plaintext: &[u8],
            recipients: &Keyring,
            _signing_key: Option<&Key>,
        ) -> Result<String> {
            anyhow::ensure!(recipients.len() > 0, "no recipients");
            let id = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "-----BEGIN FAKE MESSAGE {id}-----\n{}\n-----END FAKE MESSAGE {id}-----\n",
                base64_encode(plaintext)
            ))
        }

        fn pk_decrypt(
            &self,
            ciphertext: &[u8],
            private_keys: &Keyring,
            _validation_keys: Option<&Keyring>,
        ) -> Result<DecryptResult> {
            anyhow::ensure!(private_keys.len() > 0, "no private keys");
            let text = std::str::from_utf8(ciphertext)?;
            let body = text
                .lines()
                .find(|l| !l.starts_with("-----"))
                .context("fake message has no body")?;
            Ok(DecryptResult {
                plaintext: base64_decode(body)?,
                signature_fingerprints: vec![],
            })
        }

        fn sym_encrypt_setup(&self, plaintext: &[u8], passphrase: &str) -> Result<String> {
            Ok(format!(
                "-----BEGIN FAKE SETUP-----\n{}\n{}\n-----END FAKE SETUP-----\n",
                passphrase,
                base64_encode(plaintext)
            ))
        }

        fn sym_decrypt_setup(&self, ciphertext: &str, passphrase: &str) -> Result<Vec<u8>> {
            let mut lines = ciphertext.lines().filter(|l| !l.starts_with("-----"));
            let stored_pass = lines.next().context("missing passphrase line")?;
            anyhow::ensure!(stored_pass == passphrase, "wrong setup code");
            let body = lines.next().context("missing body line")?;
            base64_decode(body)
        }
    }

    fn base64_encode(data: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn base64_decode(data: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
    }

    #[tokio::test]
    async fn fake_roundtrips_symmetric_setup_message() {
        let crypto = FakeCrypto::default();
        let armored = crypto.sym_encrypt_setup(b"top secret key", "1234-5678").unwrap();
        let back = crypto.sym_decrypt_setup(&armored, "1234-5678").unwrap();
        assert_eq!(back, b"top secret key");
        assert!(crypto.sym_decrypt_setup(&armored, "0000-0000").is_err());
    }
}
