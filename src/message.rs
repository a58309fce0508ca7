//! Message: the state machine and read-receipt accounting.

use anyhow::Result;

use crate::chat::ChatId;
use crate::constants::{DC_MSG_ID_DAYMARKER, DC_MSG_ID_LAST_SPECIAL, DC_MSG_ID_MARKER1};
use crate::contact::ContactId;
use crate::context::Context;
use crate::events::Event;
use crate::param::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgId(pub u32);

impl MsgId {
    pub fn is_special(self) -> bool {
        self.0 <= DC_MSG_ID_LAST_SPECIAL
    }

    pub fn is_daymarker(self) -> bool {
        self.0 == DC_MSG_ID_DAYMARKER
    }

    pub fn is_marker1(self) -> bool {
        self.0 == DC_MSG_ID_MARKER1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum MsgType {
    Undefined = 0,
    Text = 10,
    Image = 20,
    Gif = 21,
    Audio = 40,
    Voice = 41,
    Video = 50,
    File = 60,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum MsgState {
    InFresh = 10,
    InNoticed = 13,
    InSeen = 16,
    OutPending = 20,
    OutFailed = 24,
    OutDelivered = 26,
    OutMdnRcvd = 28,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MsgId,
    pub rfc724_mid: String,
    pub server_folder: String,
    pub server_uid: u32,
    pub chat_id: ChatId,
    pub from_id: ContactId,
    pub to_id: ContactId,
    pub timestamp: i64,
    pub typ: MsgType,
    pub state: MsgState,
    pub text: String,
    pub param: Params,
    pub starred: bool,
    pub hidden: bool,
}

pub async fn load(context: &Context, id: MsgId) -> Result<Option<Message>> {
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, rfc724_mid, server_folder, server_uid, chat_id, from_id, to_id, timestamp, type, state, text, param, starred, hidden
                       FROM messages WHERE id=?1",
                    [id.0],
                    |row| {
                        Ok(Message {
                            id: MsgId(row.get(0)?),
                            rfc724_mid: row.get(1)?,
                            server_folder: row.get(2)?,
                            server_uid: row.get(3)?,
                            chat_id: ChatId(row.get(4)?),
                            from_id: ContactId(row.get(5)?),
                            to_id: ContactId(row.get(6)?),
                            timestamp: row.get(7)?,
                            typ: type_from_i64(row.get(8)?),
                            state: state_from_i64(row.get(9)?),
                            text: row.get(10)?,
                            param: Params::unpack(&row.get::<_, String>(11)?),
                            starred: row.get::<_, i64>(12)? != 0,
                            hidden: row.get::<_, i64>(13)? != 0,
                        })
                    },
                )
                .ok())
        })
        .await
}

pub async fn set_state(context: &Context, id: MsgId, state: MsgState) -> Result<()> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "UPDATE messages SET state=?1 WHERE id=?2",
                rusqlite::params![state as i64, id.0],
            )?;
            Ok(())
        })
        .await
}

pub async fn set_failed(context: &Context, id: MsgId, error: &str) -> Result<()> {
    let error = error.to_string();
    let chat_id: ChatId = context
        .sql()
        .with_conn(move |conn| {
            let mut params = Params::unpack(&conn.query_row::<String, _, _>(
                "SELECT param FROM messages WHERE id=?1",
                [id.0],
                |r| r.get(0),
            )?);
            params.set(crate::param::Key::Error, error)?;
            conn.execute(
                "UPDATE messages SET state=?1, param=?2 WHERE id=?3",
                rusqlite::params![MsgState::OutFailed as i64, params.pack(), id.0],
            )?;
            let chat_id: u32 = conn.query_row("SELECT chat_id FROM messages WHERE id=?1", [id.0], |r| r.get(0))?;
            Ok(ChatId(chat_id))
        })
        .await?;
    context.emit_event(Event::MsgFailed { chat_id, msg_id: id });
    Ok(())
}

/// Moves `ids` forward in the incoming chain: `IN_FRESH|IN_NOTICED →
/// IN_SEEN` for non-blocked chats, schedules an IMAP markseen job;
/// blocked chats only move `IN_FRESH → IN_NOTICED`.
pub async fn mark_seen(context: &Context, ids: &[MsgId]) -> Result<()> {
    for &id in ids {
        let Some(msg) = load(context, id).await? else { continue };
        let Some(chat) = crate::chat::load(context, msg.chat_id).await? else { continue };
        let blocked = !matches!(chat.blocked, crate::chat::ChatBlocked::Not);
        let new_state = match (blocked, msg.state) {
            (false, MsgState::InFresh | MsgState::InNoticed) => Some(MsgState::InSeen),
            (true, MsgState::InFresh) => Some(MsgState::InNoticed),
            _ => None,
        };
        if let Some(new_state) = new_state {
            set_state(context, id, new_state).await?;
            if !blocked {
                crate::job::add(
                    context,
                    crate::job::Action::MarkseenMsgOnImap,
                    id.0 as i64,
                    Params::new(),
                    0,
                )
                .await?;
            }
            context.emit_event(Event::MsgsChanged {
                chat_id: msg.chat_id,
                msg_id: Some(id),
            });
        }
    }
    Ok(())
}

pub async fn star(context: &Context, ids: &[MsgId], starred: bool) -> Result<()> {
    for &id in ids {
        context
            .sql()
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE messages SET starred=?1 WHERE id=?2",
                    rusqlite::params![starred as i64, id.0],
                )?;
                Ok(())
            })
            .await?;
    }
    Ok(())
}

pub async fn delete(context: &Context, ids: &[MsgId]) -> Result<()> {
    for &id in ids {
        context
            .sql()
            .with_conn(move |conn| {
                conn.execute("DELETE FROM messages WHERE id=?1", [id.0])?;
                Ok(())
            })
            .await?;
    }
    Ok(())
}

/// Records a read receipt for outgoing message `msg_id` from `contact_id`
/// received at `t`, and applies the single/group MDN quorum rule
///.
pub async fn receive_mdn(context: &Context, msg_id: MsgId, contact_id: ContactId, t: i64) -> Result<()> {
    let Some(msg) = load(context, msg_id).await? else { return Ok(()) };
    let Some(chat) = crate::chat::load(context, msg.chat_id).await? else { return Ok(()) };

    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_mdns (msg_id, contact_id, timestamp_sent) VALUES (?1, ?2, ?3)",
                rusqlite::params![msg_id.0, contact_id.0, t],
            )?;
            Ok(())
        })
        .await?;

    let reached_quorum = match chat.typ {
        crate::chat::ChatType::Single => true,
        crate::chat::ChatType::Group | crate::chat::ChatType::VerifiedGroup => {
            let member_count = crate::chat::members(context, msg.chat_id).await?.len() as i64;
            let soll = (member_count + 1) / 2;
            let cnt: i64 = context
                .sql()
                .with_conn(move |conn| {
                    conn.query_row(
                        "SELECT COUNT(DISTINCT contact_id) FROM message_mdns WHERE msg_id=?1",
                        [msg_id.0],
                        |r| r.get(0),
                    )
                    .map_err(Into::into)
                })
                .await?;
            cnt >= soll
        }
    };
    if reached_quorum {
        set_state(context, msg_id, MsgState::OutMdnRcvd).await?;
        context.emit_event(Event::MsgRead {
            chat_id: msg.chat_id,
            msg_id,
        });
    }
    Ok(())
}

/// Selects whose fresh messages [`mark_noticed`] moves to `IN_NOTICED`.
#[derive(Debug, Clone, Copy)]
pub enum NoticedScope {
    Chat(ChatId),
    Contact(ContactId),
}

/// Moves `IN_FRESH → IN_NOTICED` for every fresh, non-hidden message in
/// the given chat, or sent by the given contact across all chats — used
/// when the user opens a chat or a contact's profile without actually
/// reading each message yet.
pub async fn mark_noticed(context: &Context, scope: NoticedScope) -> Result<()> {
    let (sql, params): (&str, Vec<i64>) = match scope {
        NoticedScope::Chat(chat_id) => (
            "UPDATE messages SET state=?1 WHERE state=?2 AND hidden=0 AND chat_id=?3",
            vec![MsgState::InNoticed as i64, MsgState::InFresh as i64, chat_id.0 as i64],
        ),
        NoticedScope::Contact(contact_id) => (
            "UPDATE messages SET state=?1 WHERE state=?2 AND hidden=0 AND from_id=?3",
            vec![MsgState::InNoticed as i64, MsgState::InFresh as i64, contact_id.0 as i64],
        ),
    };
    let sql = sql.to_string();
    let updated = context
        .sql()
        .with_conn(move |conn| Ok(conn.execute(&sql, rusqlite::params_from_iter(params))?))
        .await?;
    if updated > 0 {
        // Potentially several chats changed (a contact can appear in more
        // than one), so broadcast with the "any chat" sentinel rather than
        // pick one.
        let chat_id = match scope {
            NoticedScope::Chat(chat_id) => chat_id,
            NoticedScope::Contact(_) => ChatId(0),
        };
        context.emit_event(Event::MsgsChanged { chat_id, msg_id: None });
    }
    Ok(())
}

/// Copies `ids` into `to_chat_id` as new fresh outgoing messages and
/// sends them, the way a forward strips E2EE guarantees and commands so
/// the copy behaves like an independent message rather than replaying
/// the original's context.
pub async fn forward(context: &Context, ids: &[MsgId], to_chat_id: ChatId) -> Result<Vec<MsgId>> {
    anyhow::ensure!(!ids.is_empty(), "forward: no message ids given");
    anyhow::ensure!(!to_chat_id.is_special(), "cannot forward into a special chat");

    let self_addr = context.get_config(crate::config::Config::Addr).await.unwrap_or_default();
    let domain = self_addr.split('@').nth(1).unwrap_or("localhost").to_string();

    let mut new_ids = Vec::with_capacity(ids.len());
    for &id in ids {
        let Some(mut msg) = load(context, id).await? else { continue };
        msg.param.remove(crate::param::Key::GuaranteeE2ee);
        msg.param.remove(crate::param::Key::ForcePlaintext);
        msg.param.remove(crate::param::Key::Cmd);
        msg.param.set_int(crate::param::Key::Forwarded, 1);

        let rfc724_mid = format!("{}@{domain}", crate::tools::create_id());
        let new_id = insert(
            context,
            NewMessage {
                rfc724_mid,
                server_folder: String::new(),
                server_uid: 0,
                chat_id: to_chat_id,
                from_id: ContactId(crate::constants::DC_CONTACT_ID_SELF),
                to_id: ContactId(crate::constants::DC_CONTACT_ID_SELF),
                timestamp: context.smeared_time(),
                typ: msg.typ,
                state: MsgState::OutPending,
                text: msg.text,
                param: msg.param,
            },
        )
        .await?;

        crate::chat::mark_promoted(context, to_chat_id).await?;
        context.emit_event(Event::MsgsChanged {
            chat_id: to_chat_id,
            msg_id: Some(new_id),
        });
        crate::mimefactory::send_message(context, new_id).await?;
        new_ids.push(new_id);
    }
    Ok(new_ids)
}

/// Renders the multi-line "message info" text: send time and sender,
/// current state, and any read receipts recorded so far.
pub async fn get_info(context: &Context, id: MsgId) -> Result<String> {
    let Some(msg) = load(context, id).await? else {
        return Ok(format!("Cannot load message {}.", id.0));
    };

    let mut out = format!("Sent: {}", crate::tools::timestamp_to_str(msg.timestamp));
    if let Some(contact) = crate::contact::load(context, msg.from_id).await? {
        out += &format!(" by {}", display_name(&contact));
    }
    out.push('\n');
    out += &format!("State: {:?}\n", msg.state);

    let reads: Vec<(ContactId, i64)> = context
        .sql()
        .with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT contact_id, timestamp_sent FROM message_mdns WHERE msg_id=?1")?;
            let rows = stmt
                .query_map([id.0], |row| Ok((ContactId(row.get(0)?), row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;
    for (contact_id, ts) in reads {
        let name = crate::contact::load(context, contact_id)
            .await?
            .map(|c| display_name(&c))
            .unwrap_or_default();
        out += &format!("Read: {} by {name}\n", crate::tools::timestamp_to_str(ts));
    }
    Ok(out)
}

fn display_name(contact: &crate::contact::Contact) -> String {
    if contact.name.is_empty() {
        contact.addr.clone()
    } else {
        contact.name.clone()
    }
}

/// Renders the one-line chatlist preview: non-text types get a label
/// (and, for files, the filename) prefixed onto the text, then the
/// whole thing is truncated to approximately `approx_len` characters.
pub async fn get_summarytext(context: &Context, id: MsgId, approx_len: usize) -> Result<String> {
    let Some(msg) = load(context, id).await? else {
        return Ok(String::new());
    };

    let prefix = match msg.typ {
        MsgType::Image => "Image".to_string(),
        MsgType::Gif => "GIF".to_string(),
        MsgType::Video => "Video".to_string(),
        MsgType::Voice => "Voice message".to_string(),
        MsgType::Audio => "Audio".to_string(),
        MsgType::File => {
            let file_name = msg
                .param
                .get(crate::param::Key::File)
                .and_then(|p| std::path::Path::new(p).file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            format!("File \u{2013} {file_name}")
        }
        MsgType::Text | MsgType::Undefined => String::new(),
    };

    let summary = if msg.text.is_empty() {
        prefix
    } else if prefix.is_empty() {
        truncate_approx(&msg.text, approx_len)
    } else {
        truncate_approx(&format!("{prefix} \u{2013} {}", msg.text), approx_len)
    };
    Ok(summary.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn truncate_approx(text: &str, approx_chars: usize) -> String {
    const ELLIPSIS: &str = "...";
    let count = text.chars().count();
    if approx_chars == 0 || count <= approx_chars + ELLIPSIS.chars().count() {
        return text.to_string();
    }
    let end_pos = text.char_indices().nth(approx_chars).map(|(n, _)| n).unwrap_or(text.len());
    match text[..end_pos].rfind([' ', '\n']) {
        Some(index) => format!("{}{ELLIPSIS}", &text[..=index]),
        None => format!("{}{ELLIPSIS}", &text[..end_pos]),
    }
}

/// Inserts an invisible `hidden=1` system-notice message, used for group
/// membership/name-change broadcasts.
pub async fn add_system_message(context: &Context, chat_id: ChatId, text: &str) -> Result<MsgId> {
    let text = text.to_string();
    let timestamp = context.smeared_time();
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (chat_id, from_id, timestamp, type, state, text, hidden)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                rusqlite::params![
                    chat_id.0,
                    crate::constants::DC_CONTACT_ID_SELF,
                    timestamp,
                    MsgType::Text as i64,
                    MsgState::OutDelivered as i64,
                    text,
                ],
            )?;
            Ok(MsgId(conn.last_insert_rowid() as u32))
        })
        .await
}

/// Fields needed to persist a message the engine just produced or just
/// received over the wire.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub rfc724_mid: String,
    pub server_folder: String,
    pub server_uid: u32,
    pub chat_id: ChatId,
    pub from_id: ContactId,
    pub to_id: ContactId,
    pub timestamp: i64,
    pub typ: MsgType,
    pub state: MsgState,
    pub text: String,
    pub param: Params,
}

/// Persists `msg`, deduplicating on `rfc724_mid` via the table's unique
/// index: a Message-ID already on file (e.g. a message the MIME parser
/// re-encounters from a second folder, or a self-sent copy) updates the
/// existing row's `server_folder`/`server_uid` to the latest sighting
/// instead of inserting a duplicate.
pub async fn insert(context: &Context, msg: NewMessage) -> Result<MsgId> {
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages
                    (rfc724_mid, server_folder, server_uid, chat_id, from_id, to_id, timestamp, type, state, text, param)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(rfc724_mid) WHERE rfc724_mid != '' DO UPDATE SET
                    server_folder=excluded.server_folder,
                    server_uid=excluded.server_uid",
                rusqlite::params![
                    msg.rfc724_mid,
                    msg.server_folder,
                    msg.server_uid,
                    msg.chat_id.0,
                    msg.from_id.0,
                    msg.to_id.0,
                    msg.timestamp,
                    msg.typ as i64,
                    msg.state as i64,
                    msg.text,
                    msg.param.pack(),
                ],
            )?;
            if !msg.rfc724_mid.is_empty() {
                let id: u32 = conn.query_row(
                    "SELECT id FROM messages WHERE rfc724_mid=?1",
                    [&msg.rfc724_mid],
                    |r| r.get(0),
                )?;
                Ok(MsgId(id))
            } else {
                Ok(MsgId(conn.last_insert_rowid() as u32))
            }
        })
        .await
}

#[cfg(test)]
pub async fn insert_for_test(context: &Context, chat_id: ChatId, timestamp: i64, text: &str) -> Result<MsgId> {
    let text = text.to_string();
    context
        .sql()
        .with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (chat_id, from_id, timestamp, type, state, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    chat_id.0,
                    crate::constants::DC_CONTACT_ID_SELF,
                    timestamp,
                    MsgType::Text as i64,
                    MsgState::OutDelivered as i64,
                    text,
                ],
            )?;
            Ok(MsgId(conn.last_insert_rowid() as u32))
        })
        .await
}

fn type_from_i64(v: i64) -> MsgType {
    match v {
        10 => MsgType::Text,
        20 => MsgType::Image,
        21 => MsgType::Gif,
        40 => MsgType::Audio,
        41 => MsgType::Voice,
        50 => MsgType::Video,
        60 => MsgType::File,
        _ => MsgType::Undefined,
    }
}

fn state_from_i64(v: i64) -> MsgState {
    match v {
        13 => MsgState::InNoticed,
        16 => MsgState::InSeen,
        20 => MsgState::OutPending,
        24 => MsgState::OutFailed,
        26 => MsgState::OutDelivered,
        28 => MsgState::OutMdnRcvd,
        _ => MsgState::InFresh,
    }
}
