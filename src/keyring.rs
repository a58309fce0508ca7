//! An ordered collection of [`Key`]s, plus the self-keypair loading
//! fallback.

use crate::key::{Key, KeyType};

#[derive(Debug, Clone, Default)]
pub struct Keyring(Vec<Key>);

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: Key) {
        self.0.push(key);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &Key> {
        self.0.iter().filter(|k| k.key_type() == KeyType::Public)
    }
}

impl FromIterator<Key> for Keyring {
    fn from_iter<T: IntoIterator<Item = Key>>(iter: T) -> Self {
        Keyring(iter.into_iter().collect())
    }
}

/// Loads the private keys usable for `self_addr`: keys belonging to the
/// exact address first, then any other stored private keys as a
/// best-effort fallback for mail moved from a legacy address
///.
pub fn load_self_private_keyring(
    all_keypairs: impl IntoIterator<Item = (String, Key)>,
    self_addr: &str,
) -> Keyring {
    let mut matching = Vec::new();
    let mut other = Vec::new();
    for (addr, key) in all_keypairs {
        if key.key_type() != KeyType::Private {
            continue;
        }
        if addr.eq_ignore_ascii_case(self_addr) {
            matching.push(key);
        } else {
            other.push(key);
        }
    }
    matching.extend(other);
    matching.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_self_private_of_empty_store_is_empty() {
        let empty: Keyring = load_self_private_keyring(std::iter::empty(), "a@example.org");
        assert!(empty.is_empty());
    }

    // Ordering (matching address before fallback addresses) is exercised
    // end-to-end in the e2ee integration tests, which can construct real
    // keypairs via the crypto test fakes; synthesizing a throwaway
    // `pgp::composed::SignedSecretKey` cheaply in a unit test here is not
    // worth the keygen cost.
}
