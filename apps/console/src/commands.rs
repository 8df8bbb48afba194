use anyhow::{anyhow, bail, Result};
use shared::domain::{ConversationKey, StatusTag};
use sync_engine::status::Tab;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select(ConversationKey),
    Send { key: ConversationKey, text: String },
    Status { key: ConversationKey, status: StatusTag },
    Scroll { key: ConversationKey, position: i64 },
    List(Tab),
    Quit,
}

pub const HELP: &str = "commands: select <phone> | send <phone> <text> | status <phone> <tag> | scroll <phone> <pos> | list [tab] | quit";

pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match verb.to_ascii_lowercase().as_str() {
        "select" => Command::Select(contact(rest)?),
        "send" => {
            let (phone, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: send <phone> <text>"))?;
            Command::Send {
                key: contact(phone)?,
                text: text.trim().to_string(),
            }
        }
        "status" => {
            let (phone, tag) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: status <phone> <tag>"))?;
            Command::Status {
                key: contact(phone)?,
                status: tag.parse()?,
            }
        }
        "scroll" => {
            let (phone, position) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: scroll <phone> <position>"))?;
            Command::Scroll {
                key: contact(phone)?,
                position: position.trim().parse()?,
            }
        }
        "list" => Command::List(tab(rest)?),
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}'"),
    };
    Ok(Some(command))
}

fn contact(raw: &str) -> Result<ConversationKey> {
    ConversationKey::from_address(raw).ok_or_else(|| anyhow!("'{raw}' is not a contact address"))
}

fn tab(raw: &str) -> Result<Tab> {
    match raw.to_ascii_lowercase().as_str() {
        "" => Ok(Tab::default()),
        "contacts" => Ok(Tab::Contacts),
        "status" | "statusview" => Ok(Tab::StatusView),
        other => Ok(Tab::Status(other.parse()?)),
    }
}
