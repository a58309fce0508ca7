//! Contact: address book entries and the trust-origin ladder. Address
//! normalization is inlined here rather than pulled in as a path
//! dependency (see DESIGN.md).

use anyhow::Result;

use crate::constants::DC_CONTACT_ID_LAST_SPECIAL;
use crate::context::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum Origin {
    IncomingUnknownFrom = 100,
    IncomingUnknownCc = 110,
    IncomingUnknownTo = 120,
    UnhandledQrScan = 130,
    IncomingReplyTo = 140,
    IncomingCc = 150,
    IncomingTo = 160,
    CreateChat = 170,
    OutgoingBcc = 180,
    OutgoingCc = 190,
    OutgoingTo = 200,
    AddressBook = 210,
    ManuallyCreated = 220,
    SecureJoined = 230,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Blocked {
    Not = 0,
    Manual = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContactId(pub u32);

#[derive(Debug, Clone)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub authname: String,
    pub addr: String,
    pub origin: Origin,
    pub blocked: bool,
}

/// Trims surrounding whitespace, strips `<angle brackets>`, and lowercases
/// just the domain part.
pub fn normalize_addr(addr: &str) -> String {
    let trimmed = addr.trim().trim_start_matches('<').trim_end_matches('>').trim();
    match trimmed.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => trimmed.to_string(),
    }
}

/// Creates or returns the existing contact for `addr`, raising its
/// origin if `origin` outranks the stored one (origin may only increase).
pub async fn lookup_or_create(context: &Context, name: &str, addr: &str, origin: Origin) -> Result<ContactId> {
    let addr = normalize_addr(addr);
    let name = name.to_string();
    let origin_val = origin as i64;
    context
        .sql()
        .with_conn(move |conn| {
            if let Some((id, existing_origin)) = conn
                .query_row(
                    "SELECT id, origin FROM contacts WHERE addr=?1",
                    [&addr],
                    |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)),
                )
                .ok()
            {
                if origin_val > existing_origin {
                    conn.execute(
                        "UPDATE contacts SET origin=?1 WHERE id=?2",
                        rusqlite::params![origin_val, id],
                    )?;
                }
                if !name.is_empty() {
                    conn.execute(
                        "UPDATE contacts SET name=?1 WHERE id=?2 AND name=''",
                        rusqlite::params![name, id],
                    )?;
                }
                return Ok(ContactId(id));
            }
            conn.execute(
                "INSERT INTO contacts (name, authname, addr, origin, blocked) VALUES (?1, '', ?2, ?3, 0)",
                rusqlite::params![name, addr, origin_val],
            )?;
            Ok(ContactId(conn.last_insert_rowid() as u32))
        })
        .await
}

pub async fn create(context: &Context, name: &str, addr: &str) -> Result<ContactId> {
    lookup_or_create(context, name, addr, Origin::ManuallyCreated).await
}

pub async fn block(context: &Context, id: ContactId, blocked: bool) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "UPDATE contacts SET blocked=?1 WHERE id=?2",
                rusqlite::params![blocked as i64, id.0],
            )?;
            Ok(())
        })
        .await
}

pub async fn load(context: &Context, id: ContactId) -> Result<Option<Contact>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, authname, addr, origin, blocked FROM contacts WHERE id=?1",
                    [id.0],
                    |row| {
                        Ok(Contact {
                            id: ContactId(row.get(0)?),
                            name: row.get(1)?,
                            authname: row.get(2)?,
                            addr: row.get(3)?,
                            origin: origin_from_i64(row.get(4)?),
                            blocked: row.get::<_, i64>(5)? != 0,
                        })
                    },
                )
                .ok())
        })
        .await
}

/// Imports one `Name <addr>` or bare `addr` per line, at `Origin::AddressBook`
///.
pub async fn add_address_book(context: &Context, lines: &str) -> Result<usize> {
    let mut count = 0;
    for line in lines.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, addr) = match line.split_once('<') {
            Some((name, rest)) => (name.trim().to_string(), rest.trim_end_matches('>').to_string()),
            None => (String::new(), line.to_string()),
        };
        if addr.contains('@') {
            lookup_or_create(context, &name, &addr, Origin::AddressBook).await?;
            count += 1;
        }
    }
    Ok(count)
}

/// Renders the contact's stored encryption state: whether a usable
/// public key is on file, its fingerprint, and the peer's Autocrypt
/// preference.
pub async fn get_encrypt_info(context: &Context, id: ContactId) -> Result<String> {
    let Some(contact) = load(context, id).await? else {
        return Ok(format!("Cannot load contact {}.", id.0));
    };
    let Some(peerstate) = crate::peerstate::load(context, &contact.addr).await? else {
        return Ok(format!("No encryption info known for {}.", contact.addr));
    };

    let mut out = String::new();
    match peerstate.usable_public_key() {
        Some(key) => out += &format!("Fingerprint: {}\n", key.fingerprint()),
        None => out += "No usable public key.\n",
    }
    out += match peerstate.prefer_encrypt {
        crate::peerstate::EncryptPreference::Mutual => "Prefers encryption: yes\n",
        crate::peerstate::EncryptPreference::Reset => {
            "Prefers encryption: reset (peer stopped sending Autocrypt headers)\n"
        }
        crate::peerstate::EncryptPreference::NoPreference => "Prefers encryption: no preference\n",
    };
    Ok(out)
}

fn origin_from_i64(v: i64) -> Origin {
    use Origin::*;
    for o in [
        IncomingUnknownFrom,
        IncomingUnknownCc,
        IncomingUnknownTo,
        UnhandledQrScan,
        IncomingReplyTo,
        IncomingCc,
        IncomingTo,
        CreateChat,
        OutgoingBcc,
        OutgoingCc,
        OutgoingTo,
        AddressBook,
        ManuallyCreated,
        SecureJoined,
    ] {
        if o as i64 == v {
            return o;
        }
    }
    IncomingUnknownFrom
}

pub fn is_special(id: ContactId) -> bool {
    id.0 <= DC_CONTACT_ID_LAST_SPECIAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::FakeCrypto;
    use std::sync::Arc;

    async fn test_context() -> Context {
        let dir = tempfile::tempdir().unwrap();
        Context::new_in_memory(Arc::new(FakeCrypto::default()), dir.path().to_path_buf())
            .await
            .unwrap()
    }

    #[test]
    fn normalize_strips_brackets_and_lowercases_domain() {
        assert_eq!(normalize_addr(" <Foo@EXAMPLE.ORG> "), "Foo@example.org");
    }

    #[tokio::test]
    async fn lookup_or_create_reuses_existing_row() {
        let ctx = test_context().await;
        let a = lookup_or_create(&ctx, "Alice", "alice@example.org", Origin::ManuallyCreated)
            .await
            .unwrap();
        let b = lookup_or_create(&ctx, "", "ALICE@example.org", Origin::IncomingUnknownFrom)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn origin_never_downgrades() {
        let ctx = test_context().await;
        let id = lookup_or_create(&ctx, "Alice", "alice@example.org", Origin::SecureJoined)
            .await
            .unwrap();
        lookup_or_create(&ctx, "Alice", "alice@example.org", Origin::IncomingUnknownFrom)
            .await
            .unwrap();
        let contact = load(&ctx, id).await.unwrap().unwrap();
        assert_eq!(contact.origin, Origin::SecureJoined);
    }

    #[tokio::test]
    async fn address_book_import_parses_name_and_bare_forms() {
        let ctx = test_context().await;
        let n = add_address_book(&ctx, "Bob <bob@example.org>\ncarol@example.org\nnot-an-address\n")
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn get_encrypt_info_with_no_peerstate_says_so() {
        let ctx = test_context().await;
        let id = create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let info = get_encrypt_info(&ctx, id).await.unwrap();
        assert!(info.contains("No encryption info known"));
    }

    const RAWKEY: &str = "xsBNBFzG3j0BCAC6iNhT8zydvCXi8LI/gFnkadMbfmSE/rTJskRRra/utGbLyDta/yTrJgWL7O3y/g4HdDW/dN2z26Y6W13IMzx9gLInn1KQZChtqWAcr/ReUucXcymwcfg1mdkBGk3TSLeLihN6CJx8Wsv8ig+kgAzte4f5rqEEAJVQ9WZHuti7UiYs6oRzqTo06CRe9owVXxzdMf0VDQtf7ZFm9dpzKKbhH7Lu8880iiotQ9/yRCkDGp9fNThsrLdZiK6OIAcIBAqi2rI89aS1dAmnRbktQieCx5izzyYkR1KvVL3gTTllHOzfKVEC2asmtWu2e4se/+O4WMIS1eGrn7GeWVb0Vwc5ABEBAAHNETxhQEBiLmV4YW1wbGUuZGU+wsCJBBABCAAzAhkBBQJcxt5FAhsDBAsJCAcGFQgJCgsCAxYCARYhBI4xxYKBgH3ANh5cufaKrc9mtiMLAAoJEPaKrc9mtiML938H/18F+3Wf9/JaAy/8hCO1v4S2PVBhxaKCokaNFtkfaMRne2l087LscCFPiFNyb4mv6Z3YeK8Xpxlp2sI0ecvdiqLUOGfnxS6tQrj+83EjtIrZ/hXOk1h121QFWH9Zg2VNHtODXjAgdLDC0NWUrclR0ZOqEDQHeo0ibTILdokVfXFN25wakPmGaYJP2y729cb1ve7RzvIvwn+Dddfxo3ao72rBfLi7l4NQ4S0KsY4cw+/6l5bRCKYCP77wZtvCwUvfVVosLdT43agtSiBI49+ayqvZ8OCvSJa61i+v81brTiEy9GBod4eAp45Ibsuemkw+gon4ZOvUXHTjwFB+h63MrozOwE0EXMbePQEIAL/vauf1zK8JgCu3V+G+SOX0iWw5xUlCPX+ERpBbWfwu3uAqn4wYXD3JDE/fVAF668xiV4eTPtlSUd5h0mn+G7uXMMOtkb+20SoEt50f8zw8TrL9t+ZsV11GKZWJpCar5AhXWsn6EEi8I2hLL5vn55ZZmHuGgN4jjmkRl3ToKCLhaXwTBjCJem7N5EH7F75wErEITa55v4Lb4Nfca7vnvtYrI1OA446xa8gHra0SINelTD09/JM/Fw4sWVPBaRZmJK/Tnu79N23No9XBUubmFPv1pNexZsQclicnTpt/BEWhiun7d6lfGB63K1aoHRTR1pcrWvBuALuuz0gqar2zlI0AEQEAAcLAdgQYAQgAIAUCXMbeRQIbDBYhBI4xxYKBgH3ANh5cufaKrc9mtiMLAAoJEPaKrc9mtiMLKSEIAIyLCRO2OyZ0IYRvRPpMn4p7E+7Pfcz/0mSkOy+1hshgJnqivXurm8zwGrwdMqeV4eslKR9H1RUdWGUQJNbtwmmjrt5DHpIhYHl5t3FpCBaGbV20Omo00Q38lBl9MtrmZkZw+ktEk6X+0xCKssMF+2MADkSOIufbR5HrDVB89VZOHCO9DeXvCUUAw2hyJiL/LHmLzJ40zYoTmb+F//f0k0j+tRdbkefyRoCmwG7YGiT+2hnCdgcezswnzah5J3ZKlrg7jOGo1LxtbvNUzxNBbC6S/aNgwm6qxo7xegRhmEl5uZ16zwyj4qz+xkjGy25Of5mWfUDoNw7OT7sjUbHOOMc=";

    #[tokio::test]
    async fn get_encrypt_info_reports_fingerprint_and_preference() {
        let ctx = test_context().await;
        let id = create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let key = crate::key::Key::from_base64(crate::key::KeyType::Public, RAWKEY).unwrap();
        let mut ps = crate::peerstate::Peerstate::new("alice@example.org");
        ps.apply_header(
            &crate::aheader::AutocryptHeader::new("alice@example.org".into(), key, crate::aheader::PreferEncrypt::Mutual),
            100,
        );
        crate::peerstate::save(&ctx, &ps).await.unwrap();

        let info = get_encrypt_info(&ctx, id).await.unwrap();
        assert!(info.contains("Fingerprint:"));
        assert!(info.contains("Prefers encryption: yes"));
    }
}
