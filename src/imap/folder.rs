//! Folder role inference:
//! XLIST flags are authoritative when present; a case-insensitive,
//! multi-language name table is the fallback.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderRole {
    Inbox,
    Sent,
    Spam,
    Trash,
    Chats,
    Other,
}

/// `flags` are the IMAP special-use/XLIST flags reported for a mailbox,
/// e.g. `\Sent`, `\Trash`. `name` is consulted only when no flag matches.
pub fn infer_folder_role(name: &str, flags: &[&str]) -> FolderRole {
    for &flag in flags {
        match flag {
            "\\Inbox" => return FolderRole::Inbox,
            "\\Sent" => return FolderRole::Sent,
            "\\Junk" | "\\Spam" => return FolderRole::Spam,
            "\\Trash" => return FolderRole::Trash,
            _ => {}
        }
    }

    let lower = name.to_ascii_lowercase();
    if lower == "inbox" {
        FolderRole::Inbox
    } else if lower == "chats" || lower.ends_with("/chats") {
        FolderRole::Chats
    } else if ["sent", "sent items", "sent messages", "gesendet", "envoyés", "enviados"]
        .contains(&lower.as_str())
    {
        FolderRole::Sent
    } else if ["spam", "junk", "junk e-mail", "spam-verdacht"].contains(&lower.as_str()) {
        FolderRole::Spam
    } else if ["trash", "deleted", "deleted items", "papierkorb", "corbeille"].contains(&lower.as_str()) {
        FolderRole::Trash
    } else {
        FolderRole::Other
    }
}
