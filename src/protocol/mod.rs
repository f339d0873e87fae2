//! Wire-level pieces of the memcached text protocol: framing primitives
//! over a carry buffer, and command/reply formatting tables.

mod command;
mod frame;

pub(crate) use command::{
    ascii_u64, check_error_reply, fetch_command, line_command, parse_value_header, store_command,
    unknown_reply, StoreVerb,
};
pub(crate) use frame::{find_token, read_line, read_value, recv_more};

/// Size of each socket recv while framing replies.
pub(crate) const RECV_SIZE: usize = 4096;
