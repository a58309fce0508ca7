//! MIME parser: turns one fetched RFC 5322 message into a decrypted,
//! classified set of parts, and [`receive_imf`] drives the rest of the
//! inbound pipeline on top of it — peer-state update, contact/chat
//! resolution, message persistence and MDN scheduling.
//!
//! Decryption recurses: a successfully decrypted payload that is itself a
//! MIME message gets re-parsed and its (now-protected) headers overlay the
//! outer envelope's, per the memoryhole convention.

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::{Context as _, Result};
use mailparse::{parse_mail, MailAddr, ParsedMail};

use crate::aheader::AutocryptHeader;
use crate::blob::BlobObject;
use crate::chat::ChatId;
use crate::config::Config;
use crate::constants::{DC_CHAT_ID_DEADDROP, DC_CONTACT_ID_SELF, MAX_DECRYPT_ITERATIONS, MAX_UUENCODED_PARTS};
use crate::contact::{self, ContactId, Origin};
use crate::context::Context;
use crate::events::Event;
use crate::keyring::Keyring;
use crate::message::{MsgId, MsgState, MsgType, NewMessage};
use crate::param::{Key as ParamKey, Params};
use crate::peerstate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartType {
    Text,
    Image,
    Gif,
    Audio,
    Voice,
    Video,
    File,
}

#[derive(Debug, Clone)]
pub struct ParsedPart {
    pub typ: PartType,
    pub mimetype: String,
    pub text: String,
    pub blob: Option<BlobObject>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub wants_mdn: bool,
    pub is_autocrypt_setup: bool,
}

/// Merged header set: the outermost RFC 5322 headers, overlaid by any
/// memoryhole-protected headers found in a successfully decrypted part
///.
#[derive(Debug, Clone, Default)]
pub struct HeaderBag(BTreeMap<String, String>);

impl HeaderBag {
    fn from_headers(headers: &[mailparse::MailHeader]) -> Self {
        let mut map = BTreeMap::new();
        for h in headers {
            map.insert(h.get_key().to_ascii_lowercase(), h.get_value());
        }
        HeaderBag(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

pub struct ParseResult {
    pub header_bag: HeaderBag,
    pub parts: Vec<ParsedPart>,
    pub subject: String,
    pub is_forwarded: bool,
    pub is_system_message: bool,
    pub decrypted: bool,
    pub signature_fingerprints: Vec<String>,
    pub is_mailing_list: bool,
    pub is_report: bool,
}

fn ctype(m: &ParsedMail) -> String {
    m.ctype.mimetype.to_ascii_lowercase()
}

fn find_first<'a>(mail: &'a ParsedMail<'a>, pred: &dyn Fn(&ParsedMail) -> bool) -> Option<&'a ParsedMail<'a>> {
    if pred(mail) {
        return Some(mail);
    }
    mail.subparts.iter().find_map(|sub| find_first(sub, pred))
}

fn find_encrypted_payload<'a>(mail: &'a ParsedMail<'a>) -> Option<&'a ParsedMail<'a>> {
    let wrapper = find_first(mail, &|m| ctype(m).starts_with("multipart/encrypted"))?;
    wrapper.subparts.iter().find(|p| ctype(p) == "application/octet-stream")
}

/// Looks for a part carrying the memoryhole-protected header block: either
/// a `text/rfc822-headers` part (its body is the raw header text) or any
/// part whose Content-Type carries `protected-headers="v1"` (its own MIME
/// headers are the protected set).
fn find_protected_headers(mail: &ParsedMail) -> Option<BTreeMap<String, String>> {
    fn scan(m: &ParsedMail, out: &mut BTreeMap<String, String>) -> bool {
        if ctype(m) == "text/rfc822-headers" {
            if let Ok(body) = m.get_body() {
                for line in body.lines() {
                    if let Some((k, v)) = line.split_once(':') {
                        out.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
                    }
                }
            }
            return true;
        }
        if m.ctype.params.get("protected-headers").map(|v| v == "v1").unwrap_or(false) {
            for h in &m.headers {
                out.insert(h.get_key().to_ascii_lowercase(), h.get_value());
            }
            return true;
        }
        m.subparts.iter().any(|sub| scan(sub, out))
    }
    let mut out = BTreeMap::new();
    scan(mail, &mut out).then_some(out)
}

fn extract_first_addr(raw: Option<&str>) -> Option<String> {
    let list = mailparse::addrparse(raw?).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.addr.to_ascii_lowercase()),
        MailAddr::Group(group) => group.addrs.first().map(|i| i.addr.to_ascii_lowercase()),
    })
}

fn extract_display_name(raw: &str) -> Option<String> {
    let list = mailparse::addrparse(raw).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => info.display_name.clone(),
        MailAddr::Group(group) => group.addrs.first().and_then(|i| i.display_name.clone()),
    })
}

/// Parses, decrypts and classifies one raw RFC 5322 message.
/// `self_keyring` is the set of private keys to attempt decryption
/// with; a usable validation key for the sender is looked up from the
/// sender's peer state, keyed off the unencrypted outer `From:` address
/// (the only thing known before decryption can even be attempted).
pub async fn parse(context: &Context, raw: &[u8], self_keyring: &Keyring) -> Result<ParseResult> {
    let outer = parse_mail(raw).context("parsing RFC 5322 message")?;
    let mut header_bag = HeaderBag::from_headers(&outer.headers);

    let envelope_from = header_bag.get("from").and_then(|v| extract_first_addr(Some(v)));
    let validation_keyring = match &envelope_from {
        Some(addr) => peerstate::load_or_new(context, addr)
            .await?
            .usable_public_key()
            .cloned()
            .map(|k| Keyring::from_iter([k])),
        None => None,
    };
    drop(outer);

    let mut buffers: Vec<Vec<u8>> = vec![raw.to_vec()];
    let mut decrypted = false;
    let mut signature_fingerprints = Vec::new();

    for _ in 0..MAX_DECRYPT_ITERATIONS {
        let current = parse_mail(buffers.last().unwrap()).context("re-parsing MIME tree")?;
        let Some(payload) = find_encrypted_payload(&current) else {
            break;
        };
        let ciphertext = payload.get_body_raw().context("reading encrypted payload")?;
        drop(current);

        match context
            .crypto()
            .pk_decrypt(&ciphertext, self_keyring, validation_keyring.as_ref())
        {
            Ok(result) => {
                decrypted = true;
                signature_fingerprints = result.signature_fingerprints;
                buffers.push(result.plaintext);
                let plain = parse_mail(buffers.last().unwrap()).context("parsing decrypted payload")?;
                if let Some(protected) = find_protected_headers(&plain) {
                    header_bag.0.extend(protected);
                }
            }
            Err(_) => break,
        }
    }

    let top = parse_mail(buffers.last().unwrap()).context("parsing final MIME tree")?;

    let is_report = ctype(&top).starts_with("multipart/report");
    let is_mailing_list = header_bag.get("list-id").is_some()
        || header_bag
            .get("precedence")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "list" | "bulk"))
            .unwrap_or(false);

    let mut parts = Vec::new();
    let mut uuencoded_budget = MAX_UUENCODED_PARTS;
    let mut is_forwarded = false;
    collect_leaf_parts(context, &top, &header_bag, &mut parts, &mut uuencoded_budget, &mut is_forwarded)?;

    let subject = header_bag.get("subject").unwrap_or_default().to_string();
    apply_subject_prepend(&mut parts, &subject, decrypted);
    apply_mdn_request_flag(&mut parts, &header_bag, envelope_from.as_deref());

    let is_system_message = header_bag
        .0
        .keys()
        .any(|k| k.starts_with("chat-group-member") || k == "chat-group-name-changed");

    Ok(ParseResult {
        header_bag,
        parts,
        subject,
        is_forwarded,
        is_system_message,
        decrypted,
        signature_fingerprints,
        is_mailing_list,
        is_report,
    })
}

fn collect_leaf_parts(
    context: &Context,
    mail: &ParsedMail,
    header_bag: &HeaderBag,
    parts: &mut Vec<ParsedPart>,
    uuencoded_budget: &mut usize,
    is_forwarded: &mut bool,
) -> Result<()> {
    let ct = ctype(mail);
    if ct.starts_with("multipart/encrypted") {
        // Ciphertext that never decrypted; nothing legible to show.
        return Ok(());
    }
    if ct.starts_with("multipart/signed") {
        if let Some(signed) = mail.subparts.first() {
            collect_leaf_parts(context, signed, header_bag, parts, uuencoded_budget, is_forwarded)?;
        }
        return Ok(());
    }
    if ct.starts_with("multipart/") {
        for sub in &mail.subparts {
            collect_leaf_parts(context, sub, header_bag, parts, uuencoded_budget, is_forwarded)?;
        }
        return Ok(());
    }
    classify_leaf(context, mail, header_bag, parts, uuencoded_budget, is_forwarded)
}

fn classify_leaf(
    context: &Context,
    mail: &ParsedMail,
    header_bag: &HeaderBag,
    parts: &mut Vec<ParsedPart>,
    uuencoded_budget: &mut usize,
    is_forwarded: &mut bool,
) -> Result<()> {
    let ct = ctype(mail);
    let disposition = mail.get_content_disposition();
    let is_attachment = disposition.disposition == mailparse::DispositionType::Attachment;

    if (ct == "text/plain" || ct == "text/html") && !is_attachment {
        let body = mail.get_body().unwrap_or_default();
        let simplified = crate::simplify::DefaultSimplify.simplify(&body, ct == "text/html");
        if simplified.is_forwarded {
            *is_forwarded = true;
        }
        parts.push(ParsedPart {
            typ: PartType::Text,
            mimetype: ct.clone(),
            text: simplified.text,
            blob: None,
            width: None,
            height: None,
            wants_mdn: false,
            is_autocrypt_setup: false,
        });
        if ct == "text/plain" {
            extract_uuencoded_parts(context, &body, parts, uuencoded_budget)?;
        }
        return Ok(());
    }

    let raw_bytes = mail.get_body_raw().unwrap_or_default();
    if raw_bytes.is_empty() {
        return Ok(());
    }
    let file_name = mail
        .ctype
        .params
        .get("name")
        .cloned()
        .or_else(|| disposition.params.get("filename").cloned())
        .unwrap_or_else(|| default_filename_for(&ct));

    let typ = classify_mimetype(&ct, header_bag);
    let (width, height) = probe_dimensions(&raw_bytes);
    let blob = BlobObject::create(context.blobdir(), &file_name, &raw_bytes).context("writing attachment blob")?;

    parts.push(ParsedPart {
        typ,
        is_autocrypt_setup: ct == "application/autocrypt-setup",
        mimetype: ct,
        text: String::new(),
        blob: Some(blob),
        width,
        height,
        wants_mdn: false,
    });
    Ok(())
}

fn classify_mimetype(ct: &str, header_bag: &HeaderBag) -> PartType {
    if ct == "application/autocrypt-setup" {
        return PartType::File;
    }
    if let Some(sub) = ct.strip_prefix("image/") {
        return match sub {
            "gif" => PartType::Gif,
            "svg+xml" => PartType::File,
            _ => PartType::Image,
        };
    }
    if ct.starts_with("audio/") {
        return if header_bag.get("chat-voice-message").is_some() {
            PartType::Voice
        } else {
            PartType::Audio
        };
    }
    if ct.starts_with("video/") {
        return PartType::Video;
    }
    PartType::File
}

fn default_filename_for(ct: &str) -> String {
    format!("attachment.{}", ct.split('/').nth(1).unwrap_or("bin"))
}

/// Probes an image's pixel dimensions from its header bytes only, without
/// decoding the full image.
fn probe_dimensions(bytes: &[u8]) -> (Option<u32>, Option<u32>) {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|r| r.into_dimensions().ok())
        .map_or((None, None), |(w, h)| (Some(w), Some(h)))
}

pub(crate) fn mime_guess_from_filename(name: &str) -> String {
    match name.rsplit('.').next().unwrap_or("").to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Decodes one uuencoded data line (the classic `begin`/`end`-delimited
/// format): the first character encodes the decoded length, and every
/// following group of 4 characters decodes to 3 bytes.
fn uudecode_line(line: &str) -> Option<Vec<u8>> {
    let bytes = line.as_bytes();
    let first = *bytes.first()?;
    let length = (first.wrapping_sub(0x20) & 0x3f) as usize;
    if length == 0 {
        return Some(Vec::new());
    }
    let data = &bytes[1..];
    let mut out = Vec::with_capacity(length);
    let mut i = 0;
    while out.len() < length && i + 4 <= data.len() {
        let c: Vec<u8> = data[i..i + 4].iter().map(|b| b.wrapping_sub(0x20) & 0x3f).collect();
        out.push((c[0] << 2) | (c[1] >> 4));
        out.push((c[1] << 4) | (c[2] >> 2));
        out.push((c[2] << 6) | c[3]);
        i += 4;
    }
    out.truncate(length);
    Some(out)
}

/// Extracts up to `*budget` uuencoded blobs from a `text/plain` body
///, decrementing the budget for each one found.
fn extract_uuencoded_parts(
    context: &Context,
    body: &str,
    parts: &mut Vec<ParsedPart>,
    budget: &mut usize,
) -> Result<()> {
    let mut lines = body.lines();
    while let Some(line) = lines.next() {
        if *budget == 0 {
            break;
        }
        let Some(rest) = line.strip_prefix("begin ") else {
            continue;
        };
        let Some((_mode, filename)) = rest.trim().split_once(' ') else {
            continue;
        };
        let filename = filename.trim();

        let mut decoded = Vec::new();
        let mut saw_end = false;
        for data_line in lines.by_ref() {
            if data_line == "end" {
                saw_end = true;
                break;
            }
            match uudecode_line(data_line) {
                Some(mut bytes) => decoded.append(&mut bytes),
                None => break,
            }
        }
        if !saw_end || decoded.is_empty() {
            continue;
        }

        let mimetype = mime_guess_from_filename(filename);
        let (width, height) = probe_dimensions(&decoded);
        let blob = BlobObject::create(context.blobdir(), filename, &decoded).context("writing uuencoded blob")?;
        parts.push(ParsedPart {
            typ: classify_mimetype(&mimetype, &HeaderBag::default()),
            mimetype,
            text: String::new(),
            blob: Some(blob),
            width,
            height,
            wants_mdn: false,
            is_autocrypt_setup: false,
        });
        *budget -= 1;
    }
    Ok(())
}

/// Subject handling: prepends `Subject – text` to the
/// first TEXT part, always when decryption failed (so a user reading an
/// unexpectedly plaintext message still sees what it's about), and
/// otherwise only when the subject isn't already a `Re:`/`Fwd:` reply.
fn apply_subject_prepend(parts: &mut [ParsedPart], subject: &str, decrypted: bool) {
    if subject.is_empty() {
        return;
    }
    let lower = subject.to_ascii_lowercase();
    let already_quoted = lower.starts_with("re:") || lower.starts_with("fwd:");
    if decrypted && already_quoted {
        return;
    }
    if let Some(first_text) = parts.iter_mut().find(|p| p.typ == PartType::Text) {
        first_text.text = format!("{subject} \u{2013} {}", first_text.text);
    }
}

/// Flags the last non-meta part `WANTS_MDN` when the message carries a
/// `Chat-Disposition-Notification-To` header whose address matches the
/// sender.
fn apply_mdn_request_flag(parts: &mut [ParsedPart], header_bag: &HeaderBag, envelope_from: Option<&str>) {
    let (Some(requested_to), Some(from_addr)) = (header_bag.get("chat-disposition-notification-to"), envelope_from)
    else {
        return;
    };
    if extract_first_addr(Some(requested_to)).as_deref() != Some(from_addr) {
        return;
    }
    if let Some(last) = parts.last_mut() {
        last.wants_mdn = true;
    }
}

fn part_type_to_msg_type(t: PartType) -> MsgType {
    match t {
        PartType::Text => MsgType::Text,
        PartType::Image => MsgType::Image,
        PartType::Gif => MsgType::Gif,
        PartType::Audio => MsgType::Audio,
        PartType::Voice => MsgType::Voice,
        PartType::Video => MsgType::Video,
        PartType::File => MsgType::File,
    }
}

fn extract_mdn_original_message_id(raw: &[u8]) -> Option<String> {
    fn scan(m: &ParsedMail) -> Option<String> {
        if ctype(m) == "message/disposition-notification" {
            let body = m.get_body().ok()?;
            for line in body.lines() {
                if let Some((k, v)) = line.split_once(':') {
                    if k.trim().eq_ignore_ascii_case("original-message-id") {
                        return Some(v.trim().trim_matches(['<', '>']).to_string());
                    }
                }
            }
        }
        m.subparts.iter().find_map(scan)
    }
    scan(&parse_mail(raw).ok()?)
}

async fn find_message_by_rfc724_mid(context: &Context, rfc724_mid: &str) -> Result<Option<MsgId>> {
    let rfc724_mid = rfc724_mid.to_string();
    context
        .sql()
        .with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT id FROM messages WHERE rfc724_mid=?1", [&rfc724_mid], |row| {
                    Ok(MsgId(row.get(0)?))
                })
                .ok())
        })
        .await
}

/// Entry point for one message fetched from `server_folder`/`server_uid`
///: parses and decrypts it, updates the
/// sender's peer state, resolves or creates the sender contact and target
/// chat, persists one message row per part, and schedules an MDN send for
/// any part that requested one.
pub async fn receive_imf(context: &Context, raw: &[u8], server_folder: &str, server_uid: u32) -> Result<Vec<MsgId>> {
    let self_addr = context.get_config(Config::Addr).await.unwrap_or_default();
    let self_keyring = crate::keyring::load_self_private_keyring(
        crate::keypair::load_private_keyring_entries(context).await?,
        &self_addr,
    );

    let result = parse(context, raw, &self_keyring).await?;

    let rfc724_mid = result
        .header_bag
        .get("message-id")
        .map(|v| v.trim_matches(['<', '>']).to_string())
        .unwrap_or_else(crate::tools::create_id);

    let Some(from_addr) = result.header_bag.get("from").and_then(|v| extract_first_addr(Some(v))) else {
        anyhow::bail!("message has no parseable From address");
    };
    let from_name = result
        .header_bag
        .get("from")
        .and_then(extract_display_name)
        .unwrap_or_default();

    let timestamp = result
        .header_bag
        .get("date")
        .and_then(|v| mailparse::dateparse(v).ok())
        .unwrap_or_else(|| context.smeared_time());

    let incoming = !from_addr.eq_ignore_ascii_case(&self_addr);

    if incoming && !result.is_mailing_list {
        let mut ps = peerstate::load_or_new(context, &from_addr).await?;
        match result.header_bag.get("autocrypt").map(|v| v.parse::<AutocryptHeader>()) {
            Some(Ok(header)) => ps.apply_header(&header, timestamp),
            _ => ps.apply_missing_header(timestamp, result.is_report),
        }
        peerstate::save(context, &ps).await?;
    }

    if result.is_report {
        if let Some(original_mid) = extract_mdn_original_message_id(raw) {
            if let Some(msg_id) = find_message_by_rfc724_mid(context, &original_mid).await? {
                let contact = contact::lookup_or_create(context, &from_name, &from_addr, Origin::IncomingUnknownFrom)
                    .await?;
                crate::message::receive_mdn(context, msg_id, contact, timestamp).await?;
            }
        }
        return Ok(Vec::new());
    }

    if result.parts.is_empty() {
        return Ok(Vec::new());
    }

    let origin = if incoming { Origin::IncomingUnknownFrom } else { Origin::OutgoingTo };
    let from_contact = contact::lookup_or_create(context, &from_name, &from_addr, origin).await?;

    let chat_id = if result.is_mailing_list {
        ChatId(DC_CHAT_ID_DEADDROP)
    } else if incoming {
        crate::chat::create_by_contact(context, from_contact).await?
    } else {
        match result.header_bag.get("to").and_then(|v| extract_first_addr(Some(v))) {
            Some(addr) if !addr.eq_ignore_ascii_case(&self_addr) => {
                let to_contact = contact::lookup_or_create(context, "", &addr, Origin::OutgoingTo).await?;
                crate::chat::create_by_contact(context, to_contact).await?
            }
            _ => crate::chat::create_self_talk(context).await?,
        }
    };

    let to_id = ContactId(DC_CONTACT_ID_SELF);
    let state = if incoming { MsgState::InFresh } else { MsgState::OutDelivered };

    let mut inserted = Vec::new();
    for (i, part) in result.parts.iter().enumerate() {
        let mut params = Params::new();
        if let Some(blob) = &part.blob {
            params.set(ParamKey::File, blob.name())?;
        }
        if let Some(w) = part.width {
            params.set_int(ParamKey::Width, w as i64);
        }
        if let Some(h) = part.height {
            params.set_int(ParamKey::Height, h as i64);
        }
        if part.wants_mdn {
            params.set_int(ParamKey::WantsMdn, 1);
        }
        if result.is_forwarded {
            params.set_int(ParamKey::Forwarded, 1);
        }

        // Only the first part dedups on the message's real Message-ID; a
        // multi-part message's remaining parts need distinct ids of their
        // own or they would collapse into the first part's row.
        let part_rfc724_mid = if i == 0 {
            rfc724_mid.clone()
        } else {
            format!("{rfc724_mid}-{i}")
        };

        let msg_id = crate::message::insert(
            context,
            NewMessage {
                rfc724_mid: part_rfc724_mid,
                server_folder: server_folder.to_string(),
                server_uid,
                chat_id,
                from_id: from_contact,
                to_id,
                timestamp,
                typ: part_type_to_msg_type(part.typ),
                state,
                text: part.text.clone(),
                param: params,
            },
        )
        .await?;
        inserted.push(msg_id);

        if part.wants_mdn && incoming && !result.is_mailing_list {
            crate::mimefactory::enqueue_mdn(context, msg_id, &from_addr).await?;
        }
    }

    context.emit_event(Event::MsgsChanged {
        chat_id,
        msg_id: inserted.first().copied(),
    });

    Ok(inserted)
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

    fn plain_message(message_id: &str, extra_headers: &str, body: &str) -> Vec<u8> {
        format!(
            "From: alice@example.org\r\n\
             To: bob@example.org\r\n\
             Subject: Hi\r\n\
             Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
             Message-ID: <{message_id}>\r\n\
             {extra_headers}\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             {body}\r\n"
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn parse_plain_text_message_classifies_as_single_text_part() {
        let (ctx, _dir) = test_context().await;
        let raw = plain_message("abc@example.org", "", "Hello there");
        let result = parse(&ctx, &raw, &Keyring::new()).await.unwrap();
        assert_eq!(result.parts.len(), 1);
        assert_eq!(result.parts[0].typ, PartType::Text);
        // Decryption never happened, so the subject is always prepended.
        assert!(result.parts[0].text.starts_with("Hi \u{2013} Hello there"));
        assert!(!result.decrypted);
    }

    #[tokio::test]
    async fn mailing_list_header_flags_is_mailing_list() {
        let (ctx, _dir) = test_context().await;
        let raw = plain_message("digest@example.org", "List-Id: <mylist.example.org>\r\n", "Body");
        let result = parse(&ctx, &raw, &Keyring::new()).await.unwrap();
        assert!(result.is_mailing_list);
    }

    #[tokio::test]
    async fn mdn_request_flags_last_part_when_from_matches() {
        let (ctx, _dir) = test_context().await;
        let raw = plain_message(
            "mdnreq@example.org",
            "Chat-Disposition-Notification-To: alice@example.org\r\n",
            "Please confirm",
        );
        let result = parse(&ctx, &raw, &Keyring::new()).await.unwrap();
        assert!(result.parts.last().unwrap().wants_mdn);
    }

    #[tokio::test]
    async fn mdn_request_is_ignored_when_address_does_not_match_sender() {
        let (ctx, _dir) = test_context().await;
        let raw = plain_message(
            "mdnreq2@example.org",
            "Chat-Disposition-Notification-To: someone-else@example.org\r\n",
            "Please confirm",
        );
        let result = parse(&ctx, &raw, &Keyring::new()).await.unwrap();
        assert!(!result.parts.last().unwrap().wants_mdn);
    }

    #[test]
    fn uudecode_line_decodes_known_vector() {
        // uuencoding of the 3 bytes "hi\n".
        assert_eq!(uudecode_line("#:&D*").unwrap(), b"hi\n".to_vec());
    }

    #[tokio::test]
    async fn uuencoded_blob_is_extracted_from_plain_text_body() {
        let (ctx, _dir) = test_context().await;
        let body = "some preamble\nbegin 644 hi.txt\n#:&D*\n`\nend\n";
        let mut parts = Vec::new();
        let mut budget = MAX_UUENCODED_PARTS;
        extract_uuencoded_parts(&ctx, body, &mut parts, &mut budget).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].blob.as_ref().unwrap().read(ctx.blobdir()).unwrap(), b"hi\n");
        assert_eq!(budget, MAX_UUENCODED_PARTS - 1);
    }

    #[tokio::test]
    async fn receive_imf_creates_contact_chat_and_message() {
        let (ctx, _dir) = test_context().await;
        ctx.set_config(Config::Addr, Some("bob@example.org")).await.unwrap();
        let raw = plain_message("abc1@example.org", "", "Hello");
        let ids = receive_imf(&ctx, &raw, "INBOX", 1).await.unwrap();
        assert_eq!(ids.len(), 1);
        let msg = crate::message::load(&ctx, ids[0]).await.unwrap().unwrap();
        assert_eq!(msg.state, MsgState::InFresh);
        let contact = contact::load(&ctx, msg.from_id).await.unwrap().unwrap();
        assert_eq!(contact.addr, "alice@example.org");
    }

    #[tokio::test]
    async fn receive_imf_routes_mailing_list_traffic_to_deaddrop_without_touching_peerstate() {
        let (ctx, _dir) = test_context().await;
        ctx.set_config(Config::Addr, Some("bob@example.org")).await.unwrap();
        let raw = plain_message("digest1@example.org", "List-Id: <mylist.example.org>\r\n", "Body");
        let ids = receive_imf(&ctx, &raw, "INBOX", 1).await.unwrap();
        let msg = crate::message::load(&ctx, ids[0]).await.unwrap().unwrap();
        assert_eq!(msg.chat_id, ChatId(DC_CHAT_ID_DEADDROP));
        assert!(peerstate::load(&ctx, "alice@example.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_imf_enqueues_mdn_job_when_requested() {
        let (ctx, _dir) = test_context().await;
        ctx.set_config(Config::Addr, Some("bob@example.org")).await.unwrap();
        let raw = plain_message(
            "mdn1@example.org",
            "Chat-Disposition-Notification-To: alice@example.org\r\n",
            "Hello",
        );
        receive_imf(&ctx, &raw, "INBOX", 1).await.unwrap();
        let job = crate::job::load_next_due(&ctx, crate::job::Thread::Smtp).await.unwrap();
        assert!(matches!(job, Some(j) if j.action == crate::job::Action::SendMdn));
    }
}
