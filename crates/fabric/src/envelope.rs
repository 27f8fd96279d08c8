//! The message envelope: every payload on the bus is a `(header, body)`
//! pair of trees, framed for the wire as two length-prefixed tree blobs.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tree::Tree;

use crate::{Error, Result};

/// Reserved header keys.
pub mod header {
    /// Sender instance id.
    pub const SIGNAL_INSTANCE_ID: &str = "signalInstanceId";
    /// Signal name (or the called slot's name on direct calls).
    pub const SIGNAL_FUNCTION: &str = "signalFunction";
    /// `"|inst:slot||inst:slot|"` list of intended receivers.
    pub const SLOT_FUNCTIONS: &str = "slotFunctions";
    /// `"|inst||inst|"` list, used for asynchronous replies.
    pub const SLOT_INSTANCE_IDS: &str = "slotInstanceIds";
    /// `"log"` for log messages, absent otherwise.
    pub const TARGET: &str = "target";
    pub const TARGET_LOG: &str = "log";
    /// Correlation id awaited by the caller.
    pub const REPLY_TO: &str = "replyTo";
    /// Sender timestamp: whole seconds and attosecond fraction.
    pub const TS: &str = "ts";
    pub const TS_FRAC: &str = "tsFrac";
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub header: Tree,
    pub body: Tree,
}

impl Message {
    pub fn new(header: Tree, body: Tree) -> Self {
        Message { header, body }
    }

    pub fn sender(&self) -> Option<&str> {
        self.header
            .get::<String>(header::SIGNAL_INSTANCE_ID)
            .ok()
            .map(String::as_str)
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.header
            .get::<String>(header::REPLY_TO)
            .ok()
            .map(String::as_str)
    }

    pub fn is_log(&self) -> bool {
        self.header.get::<String>(header::TARGET).ok().map(String::as_str)
            == Some(header::TARGET_LOG)
    }

    pub fn slot_functions(&self) -> Vec<(String, String)> {
        self.header
            .get::<String>(header::SLOT_FUNCTIONS)
            .map(|raw| parse_slot_functions(raw))
            .unwrap_or_default()
    }

    pub fn slot_instance_ids(&self) -> Vec<String> {
        self.header
            .get::<String>(header::SLOT_INSTANCE_IDS)
            .map(|raw| parse_instance_ids(raw))
            .unwrap_or_default()
    }

    /// Wire form: header blob length (u32), header blob, body blob.
    pub fn encode(&self) -> Result<Bytes> {
        let header = tree::codec::encode(&self.header)?;
        let body = tree::codec::encode(&self.body)?;
        let mut buf = BytesMut::with_capacity(4 + header.len() + body.len());
        buf.put_u32_le(header.len() as u32);
        buf.put_slice(&header);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    pub fn decode(mut data: &[u8]) -> Result<Message> {
        if data.len() < 4 {
            return Err(Error::Frame("message shorter than its length prefix".into()));
        }
        let header_len = data.get_u32_le() as usize;
        if data.len() < header_len {
            return Err(Error::Frame(format!(
                "header of {header_len} bytes exceeds the {} remaining",
                data.len()
            )));
        }
        let header = tree::codec::decode(&data[..header_len])?;
        let body = tree::codec::decode(&data[header_len..])?;
        Ok(Message { header, body })
    }

    /// Size of the encoded form, as accounted by traffic monitors.
    pub fn wire_size(&self) -> usize {
        self.encode().map(|b| b.len()).unwrap_or(0)
    }
}

/// Format receiver entries as `"|inst:slot||inst:slot|"`.
pub fn format_slot_functions<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut out = String::new();
    for (instance, slot) in entries {
        out.push('|');
        out.push_str(instance);
        out.push(':');
        out.push_str(slot);
        out.push('|');
    }
    out
}

pub fn parse_slot_functions(raw: &str) -> Vec<(String, String)> {
    raw.split('|')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            entry
                .split_once(':')
                .map(|(inst, slot)| (inst.to_string(), slot.to_string()))
        })
        .collect()
}

/// Format instance ids as `"|inst||inst|"`.
pub fn format_instance_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for id in ids {
        out.push('|');
        out.push_str(id);
        out.push('|');
    }
    out
}

pub fn parse_instance_ids(raw: &str) -> Vec<String> {
    raw.split('|')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Body keys of positional slot arguments and reply values: `a1`, `a2`, …
pub fn arg_key(position: usize) -> String {
    format!("a{}", position + 1)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tree::tree;

    #[test]
    fn slot_function_lists_round_trip() {
        let raw = format_slot_functions([("logger/1", "slotChanged"), ("gui/0", "slotChanged")]);
        assert_eq!(raw, "|logger/1:slotChanged||gui/0:slotChanged|");
        assert_eq!(
            parse_slot_functions(&raw),
            vec![
                ("logger/1".to_string(), "slotChanged".to_string()),
                ("gui/0".to_string(), "slotChanged".to_string()),
            ]
        );

        let ids = format_instance_ids(["logger/1", "gui/0"]);
        assert_eq!(ids, "|logger/1||gui/0|");
        assert_eq!(parse_instance_ids(&ids), vec!["logger/1", "gui/0"]);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        assert_eq!(parse_slot_functions("|broken|"), vec![]);
        assert_eq!(parse_slot_functions(""), vec![]);
    }

    #[test]
    fn messages_survive_the_wire() {
        let msg = Message::new(
            tree! {
                header::SIGNAL_INSTANCE_ID => "motor/1",
                header::SIGNAL_FUNCTION => "signalChanged",
            },
            tree! { "a1" => 42i32, "a2" => "state" },
        );
        let blob = msg.encode().unwrap();
        let back = Message::decode(&blob).unwrap();
        assert_eq!(msg, back);
        assert_eq!(msg.wire_size(), blob.len());
    }

    #[test]
    fn truncated_messages_fail_cleanly() {
        let msg = Message::new(tree! { "k" => 1i32 }, Tree::new());
        let blob = msg.encode().unwrap();
        assert!(Message::decode(&blob[..2]).is_err());
        assert!(Message::decode(&blob[..blob.len() - 1]).is_err());
    }
}
