//! Chat: conversations, groups, and the chatlist.

use anyhow::{bail, Result};

use crate::constants::{
    DC_CHAT_ID_ARCHIVED_LINK, DC_CHAT_ID_DEADDROP, DC_CHAT_ID_LAST_SPECIAL, DC_CHAT_ID_STARRED,
    DC_CHAT_ID_TRASH, DC_CONTACT_ID_SELF, DC_MSG_ID_DAYMARKER, DC_MSG_ID_MARKER1,
};
use crate::contact::ContactId;
use crate::context::Context;
use crate::events::Event;
use crate::message::MsgId;
use crate::param::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChatId(pub u32);

impl ChatId {
    pub fn is_special(self) -> bool {
        self.0 <= DC_CHAT_ID_LAST_SPECIAL
    }

    pub fn is_deaddrop(self) -> bool {
        self.0 == DC_CHAT_ID_DEADDROP
    }

    pub fn is_trash(self) -> bool {
        self.0 == DC_CHAT_ID_TRASH
    }

    pub fn is_archived_link(self) -> bool {
        self.0 == DC_CHAT_ID_ARCHIVED_LINK
    }

    pub fn is_starred(self) -> bool {
        self.0 == DC_CHAT_ID_STARRED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ChatType {
    Single = 100,
    Group = 120,
    VerifiedGroup = 130,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ChatBlocked {
    Not = 0,
    Manual = 1,
    Deaddrop = 2,
}

#[derive(Debug, Clone)]
pub struct Chat {
    pub id: ChatId,
    pub typ: ChatType,
    pub name: String,
    pub group_id: String,
    pub param: Params,
    pub archived: bool,
    pub blocked: ChatBlocked,
}

impl Chat {
    pub fn is_promoted(&self) -> bool {
        !self.param.get_bool(crate::param::Key::Unpromoted)
    }
}

/// Finds or creates the 1:1 chat with `contact_id`.
pub async fn create_by_contact(context: &Context, contact_id: ContactId) -> Result<ChatId> {
    if let Some(existing) = find_single_chat(context, contact_id).await? {
        return Ok(existing);
    }
    let chat_id = context
        .sql()
        .transaction(move |tx| {
            tx.execute(
                "INSERT INTO chats (type, name, param) VALUES (?1, '', 'U=1\n')",
                [ChatType::Single as i64],
            )?;
            let chat_id = tx.last_insert_rowid() as u32;
            tx.execute(
                "INSERT INTO chat_contacts (chat_id, contact_id) VALUES (?1, ?2)",
                rusqlite::params![chat_id, DC_CONTACT_ID_SELF],
            )?;
            tx.execute(
                "INSERT INTO chat_contacts (chat_id, contact_id) VALUES (?1, ?2)",
                rusqlite::params![chat_id, contact_id.0],
            )?;
            Ok(ChatId(chat_id))
        })
        .await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(chat_id)
}

async fn find_single_chat(context: &Context, contact_id: ContactId) -> Result<Option<ChatId>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT c.id FROM chats c
                       JOIN chat_contacts cc ON cc.chat_id = c.id
                      WHERE c.type = ?1 AND cc.contact_id = ?2",
                    rusqlite::params![ChatType::Single as i64, contact_id.0],
                    |row| Ok(ChatId(row.get(0)?)),
                )
                .ok())
        })
        .await
}

/// Finds or creates the "Saved Messages" chat whose only member is self
/// (used as the Autocrypt Setup Message's delivery target).
pub async fn create_self_talk(context: &Context) -> Result<ChatId> {
    if let Some(existing) = find_self_talk(context).await? {
        return Ok(existing);
    }
    let chat_id = context
        .sql()
        .transaction(move |tx| {
            tx.execute(
                "INSERT INTO chats (type, name, param) VALUES (?1, '', 'U=1\nK=1\n')",
                [ChatType::Single as i64],
            )?;
            let chat_id = tx.last_insert_rowid() as u32;
            tx.execute(
                "INSERT INTO chat_contacts (chat_id, contact_id) VALUES (?1, ?2)",
                rusqlite::params![chat_id, DC_CONTACT_ID_SELF],
            )?;
            Ok(ChatId(chat_id))
        })
        .await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(chat_id)
}

async fn find_self_talk(context: &Context) -> Result<Option<ChatId>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT c.id FROM chats c
                      WHERE c.type = ?1
                        AND (SELECT COUNT(*) FROM chat_contacts cc WHERE cc.chat_id = c.id) = 1
                        AND EXISTS (SELECT 1 FROM chat_contacts cc WHERE cc.chat_id = c.id AND cc.contact_id = ?2)",
                    rusqlite::params![ChatType::Single as i64, DC_CONTACT_ID_SELF],
                    |row| Ok(ChatId(row.get(0)?)),
                )
                .ok())
        })
        .await
}

pub async fn create_group(context: &Context, name: &str, verified: bool) -> Result<ChatId> {
    let typ = if verified { ChatType::VerifiedGroup } else { ChatType::Group };
    let name = name.to_string();
    let group_id = crate::tools::create_id();
    let chat_id = context
        .sql()
        .transaction(move |tx| {
            tx.execute(
                "INSERT INTO chats (type, name, group_id, param) VALUES (?1, ?2, ?3, 'U=1\n')",
                rusqlite::params![typ as i64, name, group_id],
            )?;
            let chat_id = tx.last_insert_rowid() as u32;
            tx.execute(
                "INSERT INTO chat_contacts (chat_id, contact_id) VALUES (?1, ?2)",
                rusqlite::params![chat_id, DC_CONTACT_ID_SELF],
            )?;
            Ok(ChatId(chat_id))
        })
        .await?;
    Ok(chat_id)
}

pub async fn add_member(context: &Context, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_contacts (chat_id, contact_id) VALUES (?1, ?2)",
                rusqlite::params![chat_id.0, contact_id.0],
            )?;
            Ok(())
        })
        .await?;
    broadcast_if_promoted(context, chat_id).await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(())
}

pub async fn remove_member(context: &Context, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "DELETE FROM chat_contacts WHERE chat_id=?1 AND contact_id=?2",
                rusqlite::params![chat_id.0, contact_id.0],
            )?;
            Ok(())
        })
        .await?;
    broadcast_if_promoted(context, chat_id).await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(())
}

pub async fn set_name(context: &Context, chat_id: ChatId, name: &str) -> Result<()> {
    let name = name.to_string();
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute("UPDATE chats SET name=?1 WHERE id=?2", rusqlite::params![name, chat_id.0])?;
            Ok(())
        })
        .await?;
    broadcast_if_promoted(context, chat_id).await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(())
}

/// Appends an invisible system message recording the membership/name
/// change, but only once the chat has sent its first user-visible
/// message.
async fn broadcast_if_promoted(context: &Context, chat_id: ChatId) -> Result<()> {
    let Some(chat) = load(context, chat_id).await? else {
        return Ok(());
    };
    if !chat.is_promoted() {
        return Ok(());
    }
    crate::message::add_system_message(context, chat_id, "group settings changed").await?;
    Ok(())
}

pub async fn load(context: &Context, chat_id: ChatId) -> Result<Option<Chat>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, type, name, group_id, param, archived, blocked FROM chats WHERE id=?1",
                    [chat_id.0],
                    |row| {
                        Ok(Chat {
                            id: ChatId(row.get(0)?),
                            typ: type_from_i64(row.get(1)?),
                            name: row.get(2)?,
                            group_id: row.get(3)?,
                            param: Params::unpack(&row.get::<_, String>(4)?),
                            archived: row.get::<_, i64>(5)? != 0,
                            blocked: blocked_from_i64(row.get(6)?),
                        })
                    },
                )
                .ok())
        })
        .await
}

/// Marks the chat promoted once the first user-visible outgoing message
/// is sent.
pub async fn mark_promoted(context: &Context, chat_id: ChatId) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            let raw: String = conn.query_row("SELECT param FROM chats WHERE id=?1", [chat_id.0], |r| r.get(0))?;
            let mut params = Params::unpack(&raw);
            params.remove(crate::param::Key::Unpromoted);
            conn.execute(
                "UPDATE chats SET param=?1 WHERE id=?2",
                rusqlite::params![params.pack(), chat_id.0],
            )?;
            Ok(())
        })
        .await
}

pub async fn archive(context: &Context, chat_id: ChatId, archived: bool) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "UPDATE chats SET archived=?1 WHERE id=?2",
                rusqlite::params![archived as i64, chat_id.0],
            )?;
            Ok(())
        })
        .await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(())
}

pub async fn delete(context: &Context, chat_id: ChatId) -> Result<()> {
    if chat_id.is_special() {
        bail!("cannot delete a virtual/special chat");
    }
    context
        .sql()
        .transaction(move |tx| {
            tx.execute("DELETE FROM messages WHERE chat_id=?1", [chat_id.0])?;
            tx.execute("DELETE FROM chat_contacts WHERE chat_id=?1", [chat_id.0])?;
            tx.execute("DELETE FROM chats WHERE id=?1", [chat_id.0])?;
            Ok(())
        })
        .await
}

/// Stores (or, passing `None`, clears) the chat's avatar as a blob and
/// broadcasts the change the same way [`set_name`] does.
pub async fn set_profile_image(context: &Context, chat_id: ChatId, path: Option<&std::path::Path>) -> Result<()> {
    let value = match path {
        Some(path) => {
            let data = std::fs::read(path)?;
            let desired_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("avatar");
            let blob = crate::blob::BlobObject::create(context.blobdir(), desired_name, &data)?;
            Some(blob.name().to_string())
        }
        None => None,
    };
    context
        .sql()
        .with_conn(move |conn| {
            let raw: String = conn.query_row("SELECT param FROM chats WHERE id=?1", [chat_id.0], |r| r.get(0))?;
            let mut params = Params::unpack(&raw);
            match &value {
                Some(v) => params.set(crate::param::Key::ProfileImage, v.clone())?,
                None => params.remove(crate::param::Key::ProfileImage),
            }
            conn.execute(
                "UPDATE chats SET param=?1 WHERE id=?2",
                rusqlite::params![params.pack(), chat_id.0],
            )?;
            Ok(())
        })
        .await?;
    broadcast_if_promoted(context, chat_id).await?;
    context.emit_event(Event::ChatModified(chat_id));
    Ok(())
}

pub async fn members(context: &Context, chat_id: ChatId) -> Result<Vec<ContactId>> {
    context
        .sql()
        .with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT contact_id FROM chat_contacts WHERE chat_id=?1")?;
            let ids = stmt
                .query_map([chat_id.0], |row| Ok(ContactId(row.get(0)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
}

/// Flags controlling [`get_messages`]'s synthetic sentinel insertion.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageListFlags {
    pub add_day_marker: bool,
    pub marker1_before: Option<MsgId>,
}

/// Returns the message ids in `chat_id`, oldest first, interleaved with
/// [`crate::constants::DC_MSG_ID_DAYMARKER`]/`DC_MSG_ID_MARKER1` sentinels
/// per `flags`.
pub async fn get_messages(context: &Context, chat_id: ChatId, flags: MessageListFlags) -> Result<Vec<u32>> {
    let rows: Vec<(u32, i64)> = context
        .sql()
        .with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id, timestamp FROM messages WHERE chat_id=?1 AND hidden=0 ORDER BY timestamp ASC, id ASC")?;
            let rows = stmt
                .query_map([chat_id.0], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    let mut last_date: Option<i64> = None;
    const SECS_PER_DAY: i64 = 86_400;
    for (id, timestamp) in rows {
        if flags.add_day_marker {
            let day = timestamp.div_euclid(SECS_PER_DAY);
            if last_date != Some(day) {
                out.push(DC_MSG_ID_DAYMARKER);
                last_date = Some(day);
            }
        }
        if flags.marker1_before == Some(MsgId(id)) {
            out.push(DC_MSG_ID_MARKER1);
        }
        out.push(id);
    }
    Ok(out)
}

/// Filters controlling [`get_chatlist`]'s result set and special-chat
/// synthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatlistFlags {
    /// Only archived chats, instead of only unarchived ones.
    pub archived_only: bool,
    /// Suppress the synthetic DEADDROP/STARRED/ARCHIVED_LINK entries.
    pub no_specials: bool,
}

/// One row of [`get_chatlist`]'s result: a chat id (real or one of the
/// virtual sentinels) paired with its most recent message, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatlistEntry {
    pub chat_id: ChatId,
    pub last_msg_id: Option<MsgId>,
}

/// Returns chats ordered by most-recent-message-first, filtered by
/// `query` (substring match on chat name) and `flags`. Unless
/// `no_specials` is set and no `query` narrows the list, also synthesizes
/// the virtual DEADDROP (contact-request messages with no chat of their
/// own), STARRED (any starred message, across all chats) and
/// ARCHIVED_LINK (a link to the archived-chats view) entries the way a
/// real chat list does.
pub async fn get_chatlist(context: &Context, query: Option<&str>, flags: ChatlistFlags) -> Result<Vec<ChatlistEntry>> {
    let archived = flags.archived_only as i64;
    let query_like = query.map(|q| format!("%{q}%"));
    let rows: Vec<(u32, Option<u32>)> = context
        .sql()
        .with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, m.id
                   FROM chats c
                   LEFT JOIN messages m
                          ON m.id = (SELECT id FROM messages
                                      WHERE chat_id=c.id AND hidden=0
                                      ORDER BY timestamp DESC, id DESC LIMIT 1)
                  WHERE c.id > ?1
                    AND c.blocked = 0
                    AND c.archived = ?2
                    AND (?3 IS NULL OR c.name LIKE ?3)
                  GROUP BY c.id
                  ORDER BY IFNULL(m.timestamp, 0) DESC, m.id DESC",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![DC_CHAT_ID_LAST_SPECIAL, archived, query_like],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;

    let mut entries: Vec<ChatlistEntry> = rows
        .into_iter()
        .map(|(chat_id, msg_id)| ChatlistEntry {
            chat_id: ChatId(chat_id),
            last_msg_id: msg_id.map(MsgId),
        })
        .collect();

    if !flags.archived_only && !flags.no_specials && query.is_none() {
        if let Some(msg_id) = last_message_with_chat_id(context, DC_CHAT_ID_DEADDROP).await? {
            entries.insert(
                0,
                ChatlistEntry {
                    chat_id: ChatId(DC_CHAT_ID_DEADDROP),
                    last_msg_id: Some(msg_id),
                },
            );
        }
        if let Some(msg_id) = last_starred_message(context).await? {
            entries.push(ChatlistEntry {
                chat_id: ChatId(DC_CHAT_ID_STARRED),
                last_msg_id: Some(msg_id),
            });
        }
        if any_archived_chat(context).await? {
            entries.push(ChatlistEntry {
                chat_id: ChatId(DC_CHAT_ID_ARCHIVED_LINK),
                last_msg_id: None,
            });
        }
    }
    Ok(entries)
}

async fn last_message_with_chat_id(context: &Context, chat_id: u32) -> Result<Option<MsgId>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM messages WHERE chat_id=?1 AND hidden=0 ORDER BY timestamp DESC, id DESC LIMIT 1",
                    [chat_id],
                    |row| row.get::<_, u32>(0),
                )
                .ok()
                .map(MsgId))
        })
        .await
}

async fn last_starred_message(context: &Context) -> Result<Option<MsgId>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM messages WHERE starred=1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                    [],
                    |row| row.get::<_, u32>(0),
                )
                .ok()
                .map(MsgId))
        })
        .await
}

async fn any_archived_chat(context: &Context) -> Result<bool> {
    context
        .sql()
        .with_conn(move |conn| Ok(conn.query_row("SELECT 1 FROM chats WHERE archived=1 LIMIT 1", [], |_| Ok(())).is_ok()))
        .await
}

/// Inserts and immediately sends a plain text message. Self-addressed so
/// `insert()`'s `rfc724_mid` dedup never
/// collapses it with a future reply.
pub async fn send_text(context: &Context, chat_id: ChatId, text: &str) -> Result<MsgId> {
    send_msg(context, chat_id, text, crate::message::MsgType::Text, Params::new()).await
}

/// Inserts and sends `path` as a file attachment, classified by filename
/// extension into the same part types `mimeparser.rs` produces on the
/// receiving end.
pub async fn send_file(context: &Context, chat_id: ChatId, path: &std::path::Path, typ: crate::message::MsgType) -> Result<MsgId> {
    let data = std::fs::read(path)?;
    let desired_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment");
    let blob = crate::blob::BlobObject::create(context.blobdir(), desired_name, &data)?;
    let mut params = Params::new();
    params.set(crate::param::Key::File, blob.name())?;
    params.set(
        crate::param::Key::MimeType,
        crate::mimeparser::mime_guess_from_filename(desired_name),
    )?;
    send_msg(context, chat_id, "", typ, params).await
}

/// Inserts and sends a voice recording, tagging it `Chat-Voice-Message`
/// so the receiving MIME factory's Autocrypt header / classification
/// promotes `audio/*` to [`crate::message::MsgType::Voice`] instead of
/// leaving it as a plain audio file.
pub async fn send_voice(context: &Context, chat_id: ChatId, path: &std::path::Path, duration_ms: i64) -> Result<MsgId> {
    let data = std::fs::read(path)?;
    let desired_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("voice.opus");
    let blob = crate::blob::BlobObject::create(context.blobdir(), desired_name, &data)?;
    let mut params = Params::new();
    params.set(crate::param::Key::File, blob.name())?;
    params.set(crate::param::Key::MimeType, "audio/opus")?;
    params.set_int(crate::param::Key::Duration, duration_ms);
    send_msg(context, chat_id, "", crate::message::MsgType::Voice, params).await
}

async fn send_msg(
    context: &Context,
    chat_id: ChatId,
    text: &str,
    typ: crate::message::MsgType,
    param: Params,
) -> Result<MsgId> {
    let rfc724_mid = crate::tools::create_id();
    let self_addr = context
        .get_config(crate::config::Config::Addr)
        .await
        .unwrap_or_default();
    let rfc724_mid = format!("{rfc724_mid}@{}", self_addr.split('@').nth(1).unwrap_or("localhost"));
    let timestamp = context.smeared_time();
    let msg_id = crate::message::insert(
        context,
        crate::message::NewMessage {
            rfc724_mid,
            server_folder: String::new(),
            server_uid: 0,
            chat_id,
            from_id: ContactId(DC_CONTACT_ID_SELF),
            to_id: ContactId(DC_CONTACT_ID_SELF),
            timestamp,
            typ,
            state: crate::message::MsgState::OutPending,
            text: text.to_string(),
            param,
        },
    )
    .await?;
    mark_promoted(context, chat_id).await?;
    context.emit_event(Event::MsgsChanged {
        chat_id,
        msg_id: Some(msg_id),
    });
    crate::mimefactory::send_message(context, msg_id).await?;
    Ok(msg_id)
}

fn type_from_i64(v: i64) -> ChatType {
    match v {
        120 => ChatType::Group,
        130 => ChatType::VerifiedGroup,
        _ => ChatType::Single,
    }
}

fn blocked_from_i64(v: i64) -> ChatBlocked {
    match v {
        1 => ChatBlocked::Manual,
        2 => ChatBlocked::Deaddrop,
        _ => ChatBlocked::Not,
    }
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

    #[tokio::test]
    async fn create_by_contact_is_idempotent() {
        let ctx = test_context().await;
        let contact = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let chat1 = create_by_contact(&ctx, contact).await.unwrap();
        let chat2 = create_by_contact(&ctx, contact).await.unwrap();
        assert_eq!(chat1, chat2);
    }

    #[tokio::test]
    async fn new_chats_start_unpromoted_and_can_be_promoted() {
        let ctx = test_context().await;
        let contact = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let chat_id = create_by_contact(&ctx, contact).await.unwrap();
        let chat = load(&ctx, chat_id).await.unwrap().unwrap();
        assert!(!chat.is_promoted());
        mark_promoted(&ctx, chat_id).await.unwrap();
        let chat = load(&ctx, chat_id).await.unwrap().unwrap();
        assert!(chat.is_promoted());
    }

    #[tokio::test]
    async fn create_self_talk_is_idempotent_and_has_only_self() {
        let ctx = test_context().await;
        let chat1 = create_self_talk(&ctx).await.unwrap();
        let chat2 = create_self_talk(&ctx).await.unwrap();
        assert_eq!(chat1, chat2);
        assert_eq!(members(&ctx, chat1).await.unwrap(), vec![ContactId(DC_CONTACT_ID_SELF)]);
    }

    const RAW_PUBLIC: &str = "xsBNBFzG3j0BCAC6iNhT8zydvCXi8LI/gFnkadMbfmSE/rTJskRRra/utGbLyDta/yTrJgWL7O3y/g4HdDW/dN2z26Y6W13IMzx9gLInn1KQZChtqWAcr/ReUucXcymwcfg1mdkBGk3TSLeLihN6CJx8Wsv8ig+kgAzte4f5rqEEAJVQ9WZHuti7UiYs6oRzqTo06CRe9owVXxzdMf0VDQtf7ZFm9dpzKKbhH7Lu8880iiotQ9/yRCkDGp9fNThsrLdZiK6OIAcIBAqi2rI89aS1dAmnRbktQieCx5izzyYkR1KvVL3gTTllHOzfKVEC2asmtWu2e4se/+O4WMIS1eGrn7GeWVb0Vwc5ABEBAAHNETxhQEBiLmV4YW1wbGUuZGU+wsCJBBABCAAzAhkBBQJcxt5FAhsDBAsJCAcGFQgJCgsCAxYCARYhBI4xxYKBgH3ANh5cufaKrc9mtiMLAAoJEPaKrc9mtiML938H/18F+3Wf9/JaAy/8hCO1v4S2PVBhxaKCokaNFtkfaMRne2l087LscCFPiFNyb4mv6Z3YeK8Xpxlp2sI0ecvdiqLUOGfnxS6tQrj+83EjtIrZ/hXOk1h121QFWH9Zg2VNHtODXjAgdLDC0NWUrclR0ZOqEDQHeo0ibTILdokVfXFN25wakPmGaYJP2y729cb1ve7RzvIvwn+Dddfxo3ao72rBfLi7l4NQ4S0KsY4cw+/6l5bRCKYCP77wZtvCwUvfVVosLdT43agtSiBI49+ayqvZ8OCvSJa61i+v81brTiEy9GBod4eAp45Ibsuemkw+gon4ZOvUXHTjwFB+h63MrozOwE0EXMbePQEIAL/vauf1zK8JgCu3V+G+SOX0iWw5xUlCPX+ERpBbWfwu3uAqn4wYXD3JDE/fVAF668xiV4eTPtlSUd5h0mn+G7uXMMOtkb+20SoEt50f8zw8TrL9t+ZsV11GKZWJpCar5AhXWsn6EEi8I2hLL5vn55ZZmHuGgN4jjmkRl3ToKCLhaXwTBjCJem7N5EH7F75wErEITa55v4Lb4Nfca7vnvtYrI1OA446xa8gHra0SINelTD09/JM/Fw4sWVPBaRZmJK/Tnu79N23No9XBUubmFPv1pNexZsQclicnTpt/BEWhiun7d6lfGB63K1aoHRTR1pcrWvBuALuuz0gqar2zlI0AEQEAAcLAdgQYAQgAIAUCXMbeRQIbDBYhBI4xxYKBgH3ANh5cufaKrc9mtiMLAAoJEPaKrc9mtiMLKSEIAIyLCRO2OyZ0IYRvRPpMn4p7E+7Pfcz/0mSkOy+1hshgJnqivXurm8zwGrwdMqeV4eslKR9H1RUdWGUQJNbtwmmjrt5DHpIhYHl5t3FpCBaGbV20Omo00Q38lBl9MtrmZkZw+ktEk6X+0xCKssMF+2MADkSOIufbR5HrDVB89VZOHCO9DeXvCUUAw2hyJiL/LHmLzJ40zYoTmb+F//f0k0j+tRdbkefyRoCmwG7YGiT+2hnCdgcezswnzah5J3ZKlrg7jOGo1LxtbvNUzxNBbC6S/aNgwm6qxo7xegRhmEl5uZ16zwyj4qz+xkjGy25Of5mWfUDoNw7OT7sjUbHOOMc=";

    /// `send_*` calls `keypair::ensure_self_keypair`, and
    /// `crypto::test_support::FakeCrypto::generate_keypair` always fails
    /// (it cannot forge real PGP material), so these tests pre-seed a
    /// default keypair the way `keypair.rs`'s own tests do, storing the
    /// same parsed public key in both halves.
    async fn seed_self_keypair(ctx: &Context, addr: &str) {
        let key = crate::key::Key::from_base64(crate::key::KeyType::Public, RAW_PUBLIC).unwrap();
        ctx.set_config(crate::config::Config::Addr, Some(addr)).await.unwrap();
        crate::keypair::save_self_keypair(ctx, addr, key.clone(), key, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_text_promotes_chat_and_enqueues_smtp_job() {
        let ctx = test_context().await;
        seed_self_keypair(&ctx, "me@example.org").await;
        let chat_id = create_self_talk(&ctx).await.unwrap();
        assert!(!load(&ctx, chat_id).await.unwrap().unwrap().is_promoted());

        let msg_id = send_text(&ctx, chat_id, "hello").await.unwrap();

        let msg = crate::message::load(&ctx, msg_id).await.unwrap().unwrap();
        assert_eq!(msg.text, "hello");
        assert!(load(&ctx, chat_id).await.unwrap().unwrap().is_promoted());
        let job = crate::job::load_next_due(&ctx, crate::job::Thread::Smtp).await.unwrap().unwrap();
        assert_eq!(job.action, crate::job::Action::SendMsgToSmtp);
    }

    #[tokio::test]
    async fn send_file_attaches_blob_and_tags_mimetype() {
        let ctx = test_context().await;
        seed_self_keypair(&ctx, "me@example.org").await;
        let chat_id = create_self_talk(&ctx).await.unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("photo.png");
        std::fs::write(&src_path, b"not a real png, just bytes").unwrap();

        let msg_id = send_file(&ctx, chat_id, &src_path, crate::message::MsgType::Image).await.unwrap();

        let msg = crate::message::load(&ctx, msg_id).await.unwrap().unwrap();
        assert_eq!(msg.typ, crate::message::MsgType::Image);
        assert_eq!(msg.param.get(crate::param::Key::MimeType), Some("image/png"));
        assert!(msg.param.get(crate::param::Key::File).is_some());
    }

    #[tokio::test]
    async fn send_voice_tags_duration_and_promotes_to_voice() {
        let ctx = test_context().await;
        seed_self_keypair(&ctx, "me@example.org").await;
        let chat_id = create_self_talk(&ctx).await.unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("note.opus");
        std::fs::write(&src_path, b"not real audio").unwrap();

        let msg_id = send_voice(&ctx, chat_id, &src_path, 4200).await.unwrap();

        let msg = crate::message::load(&ctx, msg_id).await.unwrap().unwrap();
        assert_eq!(msg.typ, crate::message::MsgType::Voice);
        assert_eq!(msg.param.get_int(crate::param::Key::Duration, 0), 4200);
    }

    #[tokio::test]
    async fn get_chatlist_orders_by_most_recent_message_first() {
        let ctx = test_context().await;
        let alice = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let bob = crate::contact::create(&ctx, "Bob", "bob@example.org").await.unwrap();
        let chat_a = create_by_contact(&ctx, alice).await.unwrap();
        let chat_b = create_by_contact(&ctx, bob).await.unwrap();
        crate::message::insert_for_test(&ctx, chat_a, 100, "older").await.unwrap();
        crate::message::insert_for_test(&ctx, chat_b, 200, "newer").await.unwrap();

        let entries = get_chatlist(&ctx, None, ChatlistFlags::default()).await.unwrap();
        let chat_ids: Vec<ChatId> = entries.iter().map(|e| e.chat_id).collect();
        assert_eq!(chat_ids, vec![chat_b, chat_a]);
    }

    #[tokio::test]
    async fn get_chatlist_filters_by_name_query() {
        let ctx = test_context().await;
        let alice = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let chat_id = create_group(&ctx, "Hiking Trip", false).await.unwrap();
        add_member(&ctx, chat_id, alice).await.unwrap();
        crate::message::insert_for_test(&ctx, chat_id, 100, "hi").await.unwrap();
        let other_chat = create_by_contact(&ctx, alice).await.unwrap();
        crate::message::insert_for_test(&ctx, other_chat, 100, "hi").await.unwrap();

        let entries = get_chatlist(&ctx, Some("Hiking"), ChatlistFlags::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chat_id, chat_id);
    }

    #[tokio::test]
    async fn get_chatlist_archived_only_excludes_unarchived_chats() {
        let ctx = test_context().await;
        let alice = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let archived_chat = create_by_contact(&ctx, alice).await.unwrap();
        crate::message::insert_for_test(&ctx, archived_chat, 100, "hi").await.unwrap();
        archive(&ctx, archived_chat, true).await.unwrap();

        let bob = crate::contact::create(&ctx, "Bob", "bob@example.org").await.unwrap();
        let plain_chat = create_by_contact(&ctx, bob).await.unwrap();
        crate::message::insert_for_test(&ctx, plain_chat, 100, "hi").await.unwrap();

        let archived_entries = get_chatlist(
            &ctx,
            None,
            ChatlistFlags {
                archived_only: true,
                no_specials: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(archived_entries.len(), 1);
        assert_eq!(archived_entries[0].chat_id, archived_chat);

        let normal_entries = get_chatlist(&ctx, None, ChatlistFlags::default()).await.unwrap();
        assert_eq!(normal_entries.len(), 1);
        assert_eq!(normal_entries[0].chat_id, plain_chat);
    }

    #[tokio::test]
    async fn get_chatlist_synthesizes_deaddrop_starred_and_archived_link() {
        let ctx = test_context().await;
        let alice = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let chat_id = create_by_contact(&ctx, alice).await.unwrap();
        let starred_msg = crate::message::insert_for_test(&ctx, chat_id, 100, "remember this").await.unwrap();
        crate::message::star(&ctx, &[starred_msg], true).await.unwrap();

        let archived_chat = create_by_contact(&ctx, crate::contact::create(&ctx, "Carol", "carol@example.org").await.unwrap())
            .await
            .unwrap();
        crate::message::insert_for_test(&ctx, archived_chat, 100, "hi").await.unwrap();
        archive(&ctx, archived_chat, true).await.unwrap();

        ctx.sql()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (chat_id, from_id, timestamp, type, state, text) VALUES (?1, 2, 50, 10, 10, 'unknown sender')",
                    [DC_CHAT_ID_DEADDROP],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let entries = get_chatlist(&ctx, None, ChatlistFlags::default()).await.unwrap();
        let chat_ids: Vec<ChatId> = entries.iter().map(|e| e.chat_id).collect();
        assert_eq!(chat_ids[0], ChatId(DC_CHAT_ID_DEADDROP));
        assert!(chat_ids.contains(&ChatId(DC_CHAT_ID_STARRED)));
        assert!(chat_ids.contains(&ChatId(DC_CHAT_ID_ARCHIVED_LINK)));
    }

    #[tokio::test]
    async fn set_profile_image_stores_then_clears_blob() {
        let ctx = test_context().await;
        let alice = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let chat_id = create_by_contact(&ctx, alice).await.unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("avatar.png");
        std::fs::write(&src_path, b"not a real png, just bytes").unwrap();

        set_profile_image(&ctx, chat_id, Some(&src_path)).await.unwrap();
        let chat = load(&ctx, chat_id).await.unwrap().unwrap();
        assert!(chat.param.get(crate::param::Key::ProfileImage).is_some());

        set_profile_image(&ctx, chat_id, None).await.unwrap();
        let chat = load(&ctx, chat_id).await.unwrap().unwrap();
        assert!(chat.param.get(crate::param::Key::ProfileImage).is_none());
    }

    #[tokio::test]
    async fn day_marker_inserted_between_different_days() {
        let ctx = test_context().await;
        let contact = crate::contact::create(&ctx, "Alice", "alice@example.org").await.unwrap();
        let chat_id = create_by_contact(&ctx, contact).await.unwrap();
        crate::message::insert_for_test(&ctx, chat_id, 10, "hi").await.unwrap();
        crate::message::insert_for_test(&ctx, chat_id, 10 + 86_400, "again tomorrow").await.unwrap();
        let ids = get_messages(
            &ctx,
            chat_id,
            MessageListFlags {
                add_day_marker: true,
                marker1_before: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(ids.iter().filter(|&&id| id == DC_MSG_ID_DAYMARKER).count(), 2);
    }
}
