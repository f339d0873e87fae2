//! Outbound command formatting and the reply-token tables for parsing
//! what the server sends back.

use crate::error::Error;

/// Storage-family verbs. Each carries its wire token and the set of
/// reply tokens memcached may legally answer with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StoreVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StoreVerb {
    pub(crate) fn token(self) -> &'static [u8] {
        match self {
            StoreVerb::Set => b"set",
            StoreVerb::Add => b"add",
            StoreVerb::Replace => b"replace",
            StoreVerb::Append => b"append",
            StoreVerb::Prepend => b"prepend",
            StoreVerb::Cas => b"cas",
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            StoreVerb::Set => "set",
            StoreVerb::Add => "add",
            StoreVerb::Replace => "replace",
            StoreVerb::Append => "append",
            StoreVerb::Prepend => "prepend",
            StoreVerb::Cas => "cas",
        }
    }

    fn accepted(self) -> &'static [&'static [u8]] {
        match self {
            StoreVerb::Cas => &[b"STORED", b"EXISTS", b"NOT_FOUND"],
            _ => &[b"STORED", b"NOT_STORED"],
        }
    }

    /// Map a storage reply to its result: `STORED` stores, `NOT_STORED`
    /// and `EXISTS` do not, `NOT_FOUND` means the key is absent. Any
    /// token outside the verb's table is a protocol violation.
    pub(crate) fn parse_reply(self, line: &[u8]) -> Result<Option<bool>, Error> {
        if !self.accepted().contains(&line) {
            return Err(unknown_reply(line));
        }
        Ok(match line {
            b"STORED" => Some(true),
            b"NOT_FOUND" => None,
            _ => Some(false),
        })
    }
}

/// Classify the generic error replies every command may receive.
pub(crate) fn check_error_reply(line: &[u8], verb: &str) -> Result<(), Error> {
    if line.starts_with(b"ERROR") {
        return Err(Error::UnknownCommand(verb.to_string()));
    }
    if line.starts_with(b"CLIENT_ERROR") {
        return Err(Error::Client(after_first_space(line)));
    }
    if line.starts_with(b"SERVER_ERROR") {
        return Err(Error::Server(after_first_space(line)));
    }
    Ok(())
}

/// An unparseable reply, truncated to keep error messages bounded.
pub(crate) fn unknown_reply(line: &[u8]) -> Error {
    let head = &line[..line.len().min(32)];
    Error::Unknown(String::from_utf8_lossy(head).into_owned())
}

fn after_first_space(line: &[u8]) -> String {
    let msg = match line.iter().position(|&b| b == b' ') {
        Some(idx) => &line[idx + 1..],
        None => &[][..],
    };
    String::from_utf8_lossy(msg).into_owned()
}

/// `<verb> <key> <flags> <expire> <bytes>[ <cas>][ noreply]\r\n<data>\r\n`
pub(crate) fn store_command(
    verb: StoreVerb,
    key: &[u8],
    flags: u16,
    expire: u32,
    data: &[u8],
    cas: Option<&[u8]>,
    noreply: bool,
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(verb.token());
    out.push(b' ');
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {} {} {}", flags, expire, data.len()).as_bytes());
    if let Some(cas) = cas {
        out.push(b' ');
        out.extend_from_slice(cas);
    }
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// `<name> <k1> <k2> ...\r\n` with keys in the caller's order.
pub(crate) fn fetch_command(name: &str, keys: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(name.as_bytes());
    for key in keys {
        out.push(b' ');
        out.extend_from_slice(key);
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// A space-joined control command line, e.g. `delete <key>[ noreply]`.
pub(crate) fn line_command(parts: &[&[u8]], noreply: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(part);
    }
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Parsed `VALUE <key> <flags> <size> [<cas>]` header.
#[derive(Debug)]
pub(crate) struct ValueHeader {
    pub(crate) key: Vec<u8>,
    pub(crate) flags: u16,
    pub(crate) size: usize,
    pub(crate) cas: Option<Vec<u8>>,
}

pub(crate) fn parse_value_header(line: &[u8], expect_cas: bool) -> Result<ValueHeader, Error> {
    let mut parts = line.split(|&b| b == b' ').filter(|part| !part.is_empty());
    // the caller matched the VALUE tag already
    parts.next();
    let key = parts.next().ok_or_else(|| unknown_reply(line))?.to_vec();
    let flags = parts
        .next()
        .and_then(ascii_u16)
        .ok_or_else(|| unknown_reply(line))?;
    let size = parts
        .next()
        .and_then(ascii_u64)
        .ok_or_else(|| unknown_reply(line))?;
    let cas = if expect_cas {
        Some(parts.next().ok_or_else(|| unknown_reply(line))?.to_vec())
    } else {
        None
    };
    Ok(ValueHeader {
        key,
        flags,
        size: size as usize,
        cas,
    })
}

pub(crate) fn ascii_u64(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn ascii_u16(digits: &[u8]) -> Option<u16> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}
