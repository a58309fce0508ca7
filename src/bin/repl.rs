//! A line-oriented testing frame, not part of the library surface
//! The engine itself is a library; this binary just drives it from a
//! terminal, sized down to this crate's actual command set.
//!
//! Usage: `repl <dbfile>`, then type commands at the `> ` prompt; `help`
//! lists them, `quit` exits.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use postbox::chat::{self, ChatId};
use postbox::config::Config;
use postbox::contact::{self, Origin};
use postbox::context::Context;
use postbox::crypto::RPgpCrypto;
use postbox::events::Event;
use postbox::{scheduler, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let dbfile: PathBuf = args.next().unwrap_or_else(|| "postbox-repl.sqlite".to_string()).into();
    let blobdir = dbfile
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("blobs");
    std::fs::create_dir_all(&blobdir)?;

    println!("opening {} (blobs under {})", dbfile.display(), blobdir.display());
    let ctx = Context::new(dbfile, blobdir, Arc::new(RPgpCrypto)).await?;

    let emitter = ctx.event_emitter();
    tokio::spawn(async move {
        while let Some(event) = emitter.recv().await {
            print_event(event);
        }
    });

    scheduler::start(&ctx).await;
    run_loop(&ctx).await;
    scheduler::stop(&ctx).await;
    Ok(())
}

fn print_event(event: Event) {
    match event {
        Event::Info(msg) => println!("[info] {msg}"),
        Event::Warning(msg) => println!("[warn] {msg}"),
        Event::Error(msg) => println!("[error] {msg}"),
        Event::MsgsChanged { chat_id, msg_id } => {
            println!("[event] msgs changed in {chat_id:?} ({msg_id:?})")
        }
        Event::MsgDelivered { chat_id, msg_id } => {
            println!("[event] delivered {msg_id:?} in {chat_id:?}")
        }
        Event::MsgFailed { chat_id, msg_id } => println!("[event] failed {msg_id:?} in {chat_id:?}"),
        Event::MsgRead { chat_id, msg_id } => println!("[event] read {msg_id:?} in {chat_id:?}"),
        Event::ChatModified(chat_id) => println!("[event] chat modified {chat_id:?}"),
        Event::ConfigureProgress(p) => println!("[configure] {p}\u{2030}"),
        Event::ImexProgress(p) => println!("[imex] {p}\u{2030}"),
        Event::ImexFileWritten(path) => println!("[imex] wrote {}", path.display()),
        Event::IsOffline | Event::HttpGet(_) => {
            // The host is expected to answer these out of band; nothing to print.
        }
    }
}

async fn run_loop(ctx: &Context) {
    print_help();
    let stdin = io::stdin();
    print!("> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let words: Vec<&str> = line.trim().split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => break,
            ["help"] => print_help(),
            ["set", key, value] => set_config(ctx, key, value).await,
            ["add-contact", name, addr] => add_contact(ctx, name, addr).await,
            ["chat", addr] => open_chat(ctx, addr).await,
            ["send", chat_id, text @ ..] => send_text(ctx, chat_id, &text.join(" ")).await,
            ["list", chat_id] => list_messages(ctx, chat_id).await,
            other => println!("unrecognized command: {other:?} (try `help`)"),
        }
        print!("> ");
        let _ = io::stdout().flush();
    }
}

fn print_help() {
    println!("commands:");
    println!("  set <key> <value>        set a config value, e.g. `set addr me@example.org`");
    println!("  add-contact <name> <addr> create or look up a contact");
    println!("  chat <addr>               open (or create) the 1:1 chat with an address");
    println!("  send <chat_id> <text...>  send a text message into a chat");
    println!("  list <chat_id>            list message ids in a chat, oldest first");
    println!("  quit                      exit");
}

async fn set_config(ctx: &Context, key: &str, value: &str) {
    let Some(config) = parse_config_key(key) else {
        println!("unknown config key {key}");
        return;
    };
    if let Err(err) = ctx.set_config(config, Some(value)).await {
        warn!(ctx, "set-config failed: {err:#}");
    }
}

fn parse_config_key(key: &str) -> Option<Config> {
    Some(match key {
        "addr" => Config::Addr,
        "mail_server" => Config::MailServer,
        "mail_port" => Config::MailPort,
        "mail_user" => Config::MailUser,
        "mail_pw" => Config::MailPw,
        "send_server" => Config::SendServer,
        "send_port" => Config::SendPort,
        "send_user" => Config::SendUser,
        "send_pw" => Config::SendPw,
        "displayname" => Config::Displayname,
        "e2ee_enabled" => Config::E2eeEnabled,
        "mdns_enabled" => Config::MdnsEnabled,
        _ => return None,
    })
}

async fn add_contact(ctx: &Context, name: &str, addr: &str) {
    match contact::create(ctx, name, addr).await {
        Ok(id) => println!("contact {id:?}"),
        Err(err) => warn!(ctx, "add-contact failed: {err:#}"),
    }
}

async fn open_chat(ctx: &Context, addr: &str) {
    let contact_id = match contact::lookup_or_create(ctx, addr, addr, Origin::ManuallyCreated).await {
        Ok(id) => id,
        Err(err) => {
            warn!(ctx, "lookup-or-create failed: {err:#}");
            return;
        }
    };
    match chat::create_by_contact(ctx, contact_id).await {
        Ok(chat_id) => println!("chat {chat_id:?}"),
        Err(err) => warn!(ctx, "chat creation failed: {err:#}"),
    }
}

async fn send_text(ctx: &Context, chat_id: &str, text: &str) {
    let Some(chat_id) = parse_chat_id(chat_id) else {
        println!("not a chat id: {chat_id}");
        return;
    };
    match chat::send_text(ctx, chat_id, text).await {
        Ok(msg_id) => println!("queued {msg_id:?}"),
        Err(err) => warn!(ctx, "send failed: {err:#}"),
    }
}

async fn list_messages(ctx: &Context, chat_id: &str) {
    let Some(chat_id) = parse_chat_id(chat_id) else {
        println!("not a chat id: {chat_id}");
        return;
    };
    match chat::get_messages(ctx, chat_id, chat::MessageListFlags::default()).await {
        Ok(ids) => println!("{ids:?}"),
        Err(err) => warn!(ctx, "listing messages failed: {err:#}"),
    }
}

fn parse_chat_id(raw: &str) -> Option<ChatId> {
    raw.parse::<u32>().ok().map(ChatId)
}
