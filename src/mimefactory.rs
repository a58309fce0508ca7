//! MIME factory: turns one outgoing [`MsgId`] into a rendered RFC
//! 5322 message and an `SendMsgToSmtp`/`SendMdn` job.

use anyhow::{Context as _, Result};

use crate::blob::BlobObject;
use crate::chat::{self, Chat, ChatId, ChatType};
use crate::config::Config;
use crate::constants::DC_CONTACT_ID_SELF;
use crate::contact::{self, Contact, ContactId};
use crate::context::Context;
use crate::job::{self, Action};
use crate::keypair;
use crate::message::{self, MsgId};
use crate::param::{Key as ParamKey, Params};
use crate::peerstate::{self, Peerstate};

/// Generic command codes for system-generated messages, alongside
/// `imex.rs`'s own `CMD_AUTOCRYPT_SETUP_MESSAGE`. Meaning lives entirely
/// in [`ParamKey::Cmd`]/[`ParamKey::CmdArg`].
const CMD_GROUP_NAME_CHANGED: i64 = 2;
const CMD_MEMBER_ADDED: i64 = 4;
const CMD_MEMBER_REMOVED: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncryptDecision {
    Plaintext,
    Encrypt,
    Refuse,
}

/// The encrypt-decision table: a message forced to
/// plaintext never encrypts; otherwise encryption happens whenever e2ee
/// is enabled locally and every recipient has a usable key; a message
/// that *requires* e2ee but can't get it is refused rather than silently
/// downgraded.
fn decide_encryption(
    e2ee_enabled: bool,
    guaranteed: bool,
    force_plaintext: bool,
    all_recipients_encryptable: bool,
) -> EncryptDecision {
    if force_plaintext {
        return EncryptDecision::Plaintext;
    }
    if e2ee_enabled && all_recipients_encryptable {
        return EncryptDecision::Encrypt;
    }
    if guaranteed {
        return EncryptDecision::Refuse;
    }
    EncryptDecision::Plaintext
}

fn new_message_id(self_addr: &str) -> String {
    let domain = self_addr.split('@').nth(1).unwrap_or("localhost");
    format!("{}@{domain}", crate::tools::create_id())
}

fn format_date(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc2822()
}

/// Renders the `Chat-*` headers carried by every outgoing chat message
///: group identity, and, for system messages, the
/// command the recipient's MIME parser should act on.
fn render_chat_headers(chat: &Chat, params: &Params, typ: message::MsgType) -> String {
    let mut out = String::from("Chat-Version: 1.0\r\n");
    if chat.typ != ChatType::Single {
        out += &format!("Chat-Group-ID: {}\r\n", chat.group_id);
        out += &format!("Chat-Group-Name: {}\r\n", chat.name);
    }
    if typ == message::MsgType::Voice {
        out += "Chat-Voice-Message: 1\r\n";
    }
    match params.get_int(ParamKey::Cmd, 0) {
        CMD_GROUP_NAME_CHANGED => {
            if let Some(old_name) = params.get(ParamKey::CmdArg) {
                out += &format!("Chat-Group-Name-Changed: {old_name}\r\n");
            }
        }
        CMD_MEMBER_ADDED => {
            if let Some(addr) = params.get(ParamKey::CmdArg) {
                out += &format!("Chat-Group-Member-Added: {addr}\r\n");
            }
        }
        CMD_MEMBER_REMOVED => {
            if let Some(addr) = params.get(ParamKey::CmdArg) {
                out += &format!("Chat-Group-Member-Removed: {addr}\r\n");
            }
        }
        _ => {}
    }
    out
}

/// Picks a Subject line: the chat's name once it carries one worth
/// showing in a mail client's inbox, else a short snippet of the body
///.
fn render_subject(chat: &Chat, text: &str) -> String {
    if chat.typ != ChatType::Single && chat.is_promoted() && !chat.name.is_empty() {
        return format!("Chat: {}", chat.name);
    }
    let snippet: String = text.chars().take(60).collect();
    if snippet.is_empty() {
        "Message".to_string()
    } else {
        snippet
    }
}

fn mimetype_for(params: &Params) -> String {
    params
        .get(ParamKey::MimeType)
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Renders the memoryhole-protected header block mimeparser.rs's
/// `find_protected_headers` looks for: a `text/rfc822-headers` part whose
/// body carries the headers an observer outside the ciphertext shouldn't
/// see in the clear.
fn render_protected_header_block(boundary: &str, subject: &str, chat_headers: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: text/rfc822-headers; protected-headers=\"v1\"\r\n\
         \r\n\
         Subject: {subject}\r\n\
         {chat_headers}\r\n"
    )
}

async fn load_recipients(context: &Context, chat_id: ChatId) -> Result<Vec<Contact>> {
    let member_ids = chat::members(context, chat_id).await?;
    let mut recipients = Vec::new();
    for id in member_ids {
        if id == ContactId(DC_CONTACT_ID_SELF) {
            continue;
        }
        if let Some(c) = contact::load(context, id).await? {
            recipients.push(c);
        }
    }
    if recipients.is_empty() {
        // Self-talk: deliver the single copy to the account's own address.
        if let Some(c) = contact::load(context, ContactId(DC_CONTACT_ID_SELF)).await? {
            recipients.push(c);
        }
    }
    Ok(recipients)
}

/// Renders `msg_id` to an RFC 5322 message and enqueues it for the SMTP
/// loop. Refuses (marking the message `OUT_FAILED`) if
/// [`ParamKey::GuaranteeE2ee`] is set but not every recipient has a
/// usable Autocrypt key on file.
pub async fn send_message(context: &Context, msg_id: MsgId) -> Result<()> {
    let msg = message::load(context, msg_id).await?.context("message not found")?;
    let chat = chat::load(context, msg.chat_id).await?.context("chat not found")?;
    let recipients = load_recipients(context, msg.chat_id).await?;

    let guaranteed = msg.param.get_bool(ParamKey::GuaranteeE2ee);
    let force_plaintext = msg.param.exists(ParamKey::ForcePlaintext);
    let e2ee_enabled = context.get_config_bool(Config::E2eeEnabled, true).await;

    let mut peerstates: Vec<Peerstate> = Vec::with_capacity(recipients.len());
    for r in &recipients {
        peerstates.push(peerstate::load_or_new(context, &r.addr).await?);
    }
    let all_encryptable = !recipients.is_empty() && peerstates.iter().all(|p| p.usable_public_key().is_some());

    let decision = decide_encryption(e2ee_enabled, guaranteed, force_plaintext, all_encryptable);
    if decision == EncryptDecision::Refuse {
        message::set_failed(context, msg_id, "GUARANTEED_E2EE_UNAVAILABLE").await?;
        return Ok(());
    }

    let self_addr = context.get_config(Config::Addr).await.unwrap_or_default();
    let self_keypair = keypair::ensure_self_keypair(context, &self_addr).await?;

    let attachment = match msg.param.get(ParamKey::File) {
        Some(name) => {
            let blob = BlobObject::from_name(name);
            let bytes = blob.read(context.blobdir())?;
            Some((blob, bytes))
        }
        None => None,
    };

    let subject = render_subject(&chat, &msg.text);
    let chat_headers = render_chat_headers(&chat, &msg.param, msg.typ);
    let rfc724_mid = new_message_id(&self_addr);
    let date = format_date(msg.timestamp);
    let to_list = recipients.iter().map(|c| c.addr.clone()).collect::<Vec<_>>().join(", ");
    let to_recipients = recipients.iter().map(|c| c.addr.clone()).collect::<Vec<_>>().join("\u{1e}");

    let attachment_mimetype = mimetype_for(&msg.param);
    let boundary = crate::tools::create_id();
    let body_with_attachment = render_body_with_bytes(&boundary, &msg.text, attachment.as_ref(), &attachment_mimetype);

    let rfc5322 = match decision {
        EncryptDecision::Encrypt => {
            let protected_boundary = crate::tools::create_id();
            let plaintext = format!(
                "Content-Type: multipart/mixed; boundary=\"{protected_boundary}\"\r\n\
                 \r\n\
                 {}{}",
                render_protected_header_block(&protected_boundary, &subject, &chat_headers),
                render_body_with_bytes(&protected_boundary, &msg.text, attachment.as_ref(), &attachment_mimetype),
            );

            let mut recipient_keyring = crate::keyring::Keyring::new();
            for p in &peerstates {
                if let Some(k) = p.usable_public_key() {
                    recipient_keyring.add(k.clone());
                }
            }
            let armored = context
                .crypto()
                .pk_encrypt(plaintext.as_bytes(), &recipient_keyring, Some(&self_keypair.private))
                .context("encrypting outgoing message")?;

            let outer_boundary = crate::tools::create_id();
            let autocrypt = render_autocrypt_header(&self_addr, &self_keypair.public, e2ee_enabled);
            format!(
                "From: {self_addr}\r\n\
                 To: {to_list}\r\n\
                 Subject: {subject}\r\n\
                 Message-ID: <{rfc724_mid}>\r\n\
                 Date: {date}\r\n\
                 {autocrypt}\
                 MIME-Version: 1.0\r\n\
                 Content-Type: multipart/encrypted; protocol=\"application/pgp-encrypted\"; boundary=\"{outer_boundary}\"\r\n\
                 \r\n\
                 --{outer_boundary}\r\n\
                 Content-Type: application/pgp-encrypted\r\n\
                 \r\n\
                 Version: 1\r\n\
                 \r\n\
                 --{outer_boundary}\r\n\
                 Content-Type: application/octet-stream; name=\"encrypted.asc\"\r\n\
                 \r\n\
                 {armored}\
                 --{outer_boundary}--\r\n"
            )
        }
        EncryptDecision::Plaintext => {
            let autocrypt = if force_plaintext {
                String::new()
            } else {
                render_autocrypt_header(&self_addr, &self_keypair.public, e2ee_enabled)
            };
            format!(
                "From: {self_addr}\r\n\
                 To: {to_list}\r\n\
                 Subject: {subject}\r\n\
                 Message-ID: <{rfc724_mid}>\r\n\
                 Date: {date}\r\n\
                 {autocrypt}\
                 {chat_headers}\
                 MIME-Version: 1.0\r\n\
                 Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\
                 \r\n\
                 {body_with_attachment}"
            )
        }
        EncryptDecision::Refuse => unreachable!("handled above"),
    };

    let rendered = BlobObject::create(context.blobdir(), "outgoing.eml", rfc5322.as_bytes())?;
    let mut job_params = Params::new();
    job_params.set(ParamKey::File, rendered.name())?;
    job_params.set(ParamKey::Recipients, to_recipients)?;
    job::add(context, Action::SendMsgToSmtp, msg_id.0 as i64, job_params, 0).await?;
    Ok(())
}

fn render_body_with_bytes(
    boundary: &str,
    text: &str,
    attachment: Option<&(BlobObject, Vec<u8>)>,
    mimetype: &str,
) -> String {
    let mut out = format!(
        "--{boundary}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {text}\r\n"
    );
    if let Some((blob, bytes)) = attachment {
        use base64::Engine;
        out += &format!(
            "--{boundary}\r\n\
             Content-Type: {mimetype}; name=\"{name}\"\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             {data}\r\n",
            name = blob.name(),
            data = base64::engine::general_purpose::STANDARD.encode(bytes),
        );
    }
    out += &format!("--{boundary}--\r\n");
    out
}

fn render_autocrypt_header(self_addr: &str, self_public: &crate::key::Key, e2ee_enabled: bool) -> String {
    let prefer_encrypt = if e2ee_enabled {
        crate::aheader::PreferEncrypt::Mutual
    } else {
        crate::aheader::PreferEncrypt::NoPreference
    };
    let header = crate::aheader::AutocryptHeader::new(self_addr.to_string(), self_public.clone(), prefer_encrypt);
    format!("Autocrypt: {header}\r\n")
}

/// Renders and enqueues a read receipt for `msg_id`, addressed to
/// `to_addr`. Always `FORCE_PLAINTEXT`:
/// an MDN carries no content worth protecting and none of
/// [`send_message`]'s encrypt-decision machinery applies, matching
/// `imex.rs`'s setup-message carrier.
pub async fn enqueue_mdn(context: &Context, msg_id: MsgId, to_addr: &str) -> Result<()> {
    let msg = message::load(context, msg_id).await?.context("message not found")?;
    let self_addr = context.get_config(Config::Addr).await.unwrap_or_default();
    let rfc724_mid = new_message_id(&self_addr);
    let date = format_date(context.smeared_time());
    let boundary = crate::tools::create_id();

    let rfc5322 = format!(
        "From: {self_addr}\r\n\
         To: {to_addr}\r\n\
         Subject: Read receipt\r\n\
         Message-ID: <{rfc724_mid}>\r\n\
         Date: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/report; report-type=disposition-notification; boundary=\"{boundary}\"\r\n\
         \r\n\
         --{boundary}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         This is a read receipt for the message you sent.\r\n\
         \r\n\
         --{boundary}\r\n\
         Content-Type: message/disposition-notification\r\n\
         \r\n\
         Original-Message-ID: <{orig}>\r\n\
         Disposition: manual-action/MDN-sent-manually; displayed\r\n\
         \r\n\
         --{boundary}--\r\n",
        orig = msg.rfc724_mid,
    );

    let rendered = BlobObject::create(context.blobdir(), "mdn.eml", rfc5322.as_bytes())?;
    let mut job_params = Params::new();
    job_params.set(ParamKey::File, rendered.name())?;
    job_params.set(ParamKey::Recipients, to_addr)?;
    job::add(context, Action::SendMdn, msg_id.0 as i64, job_params, 0).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::FakeCrypto;
    use std::sync::Arc;

    async fn test_context() -> (Context, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new_in_memory(Arc::new(FakeCrypto::default()), dir.path().to_path_buf())
            .await
            .unwrap();
        (ctx, dir)
    }

    #[test]
    fn decide_encryption_prefers_plaintext_when_forced() {
        assert_eq!(
            decide_encryption(true, true, true, true),
            EncryptDecision::Plaintext
        );
    }

    #[test]
    fn decide_encryption_encrypts_when_possible() {
        assert_eq!(decide_encryption(true, false, false, true), EncryptDecision::Encrypt);
    }

    #[test]
    fn decide_encryption_refuses_when_guaranteed_but_unavailable() {
        assert_eq!(decide_encryption(true, true, false, false), EncryptDecision::Refuse);
    }

    #[test]
    fn decide_encryption_falls_back_to_plaintext_when_not_guaranteed() {
        assert_eq!(
            decide_encryption(true, false, false, false),
            EncryptDecision::Plaintext
        );
    }

    #[tokio::test]
    async fn send_message_refuses_when_e2ee_is_guaranteed_but_unavailable() {
        let (ctx, _dir) = test_context().await;
        ctx.set_config(Config::Addr, Some("bob@example.org")).await.unwrap();
        let chat_id = chat::create_self_talk(&ctx).await.unwrap();
        let mut params = Params::new();
        params.set_int(ParamKey::GuaranteeE2ee, 1);
        let msg_id = message::insert(
            &ctx,
            message::NewMessage {
                rfc724_mid: "guaranteed1@example.org".to_string(),
                server_folder: String::new(),
                server_uid: 0,
                chat_id,
                from_id: ContactId(DC_CONTACT_ID_SELF),
                to_id: ContactId(DC_CONTACT_ID_SELF),
                timestamp: 1_700_000_000,
                typ: crate::message::MsgType::Text,
                state: crate::message::MsgState::OutPending,
                text: "secret".to_string(),
                param: params,
            },
        )
        .await
        .unwrap();

        send_message(&ctx, msg_id).await.unwrap();

        let msg = message::load(&ctx, msg_id).await.unwrap().unwrap();
        assert_eq!(msg.state, crate::message::MsgState::OutFailed);
        assert_eq!(msg.param.get(ParamKey::Error), Some("GUARANTEED_E2EE_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn enqueue_mdn_renders_a_plaintext_disposition_notification() {
        let (ctx, _dir) = test_context().await;
        ctx.set_config(Config::Addr, Some("bob@example.org")).await.unwrap();
        let chat_id = chat::create_self_talk(&ctx).await.unwrap();
        let msg_id = message::insert(
            &ctx,
            message::NewMessage {
                rfc724_mid: "orig1@example.org".to_string(),
                server_folder: String::new(),
                server_uid: 0,
                chat_id,
                from_id: ContactId(DC_CONTACT_ID_SELF),
                to_id: ContactId(DC_CONTACT_ID_SELF),
                timestamp: 1_700_000_000,
                typ: crate::message::MsgType::Text,
                state: crate::message::MsgState::InFresh,
                text: "hi".to_string(),
                param: Params::new(),
            },
        )
        .await
        .unwrap();

        enqueue_mdn(&ctx, msg_id, "alice@example.org").await.unwrap();

        let job = job::load_next_due(&ctx, job::Thread::Smtp).await.unwrap().unwrap();
        assert_eq!(job.action, Action::SendMdn);
        assert_eq!(job.param.get(ParamKey::Recipients), Some("alice@example.org"));
    }
}
