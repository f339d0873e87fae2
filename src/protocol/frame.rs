//! Framing over a byte stream: `\r\n`-terminated lines and
//! length-prefixed values, both resilient to terminators straddling recv
//! boundaries. Bytes past the current frame stay in the carry buffer for
//! the next call.

use std::io::ErrorKind;

use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::transport::Transport;

use super::RECV_SIZE;

/// Pull one recv worth of bytes into the carry buffer, retrying
/// transparently when a signal interrupts the call.
pub(crate) fn recv_more<T: Transport>(sock: &mut T, carry: &mut BytesMut) -> Result<(), Error> {
    let mut chunk = [0_u8; RECV_SIZE];
    loop {
        match sock.recv(&mut chunk) {
            Ok(0) => return Err(Error::UnexpectedClose),
            Ok(n) => {
                carry.extend_from_slice(&chunk[..n]);
                return Ok(());
            }
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Read one line, stripping the `\r\n` terminator and leaving any bytes
/// past it in `carry`. The `\r` and `\n` may arrive in different recvs.
pub(crate) fn read_line<T: Transport>(
    sock: &mut T,
    carry: &mut BytesMut,
) -> Result<Vec<u8>, Error> {
    // Bytes scanned on a previous pass cannot contain the terminator,
    // except for a trailing '\r' still waiting on its '\n'.
    let mut scanned = 0;
    loop {
        if let Some(pos) = find_token(&carry[scanned..], b"\r\n") {
            let line = carry.split_to(scanned + pos);
            carry.advance(2);
            return Ok(line.to_vec());
        }
        scanned = carry.len().saturating_sub(1);
        recv_more(sock, carry)?;
    }
}

/// Read exactly `size` bytes of payload plus the trailing `\r\n`,
/// returning the payload and leaving the rest in `carry`.
pub(crate) fn read_value<T: Transport>(
    sock: &mut T,
    carry: &mut BytesMut,
    size: usize,
) -> Result<Vec<u8>, Error> {
    while carry.len() < size + 2 {
        recv_more(sock, carry)?;
    }
    let value = carry.split_to(size);
    carry.advance(2);
    Ok(value.to_vec())
}

pub(crate) fn find_token(haystack: &[u8], token: &[u8]) -> Option<usize> {
    if haystack.len() < token.len() {
        return None;
    }
    haystack.windows(token.len()).position(|w| w == token)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::error::Error;
    use crate::transport::testing::{Script, ScriptedTransport};

    use super::{read_line, read_value};

    #[test]
    fn test_read_line_single_recv() {
        let mut sock = ScriptedTransport::replying(vec![b"STORED\r\nEND\r\n"]);
        let mut carry = BytesMut::new();
        let line = read_line(&mut sock, &mut carry).unwrap();
        assert_eq!(b"STORED".to_vec(), line);
        assert_eq!(b"END\r\n"[..], carry[..]);
    }

    #[test]
    fn test_read_line_from_carry_without_recv() {
        let mut sock = ScriptedTransport::replying(vec![]);
        let mut carry = BytesMut::from(&b"VALUE k 0 1\r\nrest"[..]);
        let line = read_line(&mut sock, &mut carry).unwrap();
        assert_eq!(b"VALUE k 0 1".to_vec(), line);
        assert_eq!(b"rest"[..], carry[..]);
    }

    #[test]
    fn test_read_line_terminator_straddles_recvs() {
        let mut sock = ScriptedTransport::replying(vec![b"STO", b"RED\r", b"\nEND\r\n"]);
        let mut carry = BytesMut::new();
        let line = read_line(&mut sock, &mut carry).unwrap();
        assert_eq!(b"STORED".to_vec(), line);
        assert_eq!(b"END\r\n"[..], carry[..]);
    }

    #[test]
    fn test_read_line_byte_at_a_time() {
        let chunks: Vec<&'static [u8]> = vec![b"O", b"K", b"\r", b"\n"];
        let mut sock = ScriptedTransport::replying(chunks);
        let mut carry = BytesMut::new();
        let line = read_line(&mut sock, &mut carry).unwrap();
        assert_eq!(b"OK".to_vec(), line);
        assert!(carry.is_empty());
    }

    #[test]
    fn test_read_line_unexpected_close() {
        let mut sock = ScriptedTransport::replying(vec![b"STOR"]);
        let mut carry = BytesMut::new();
        match read_line(&mut sock, &mut carry) {
            Err(Error::UnexpectedClose) => (),
            other => panic!("expected UnexpectedClose, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_read_line_retries_interrupted_recv() {
        let mut sock = ScriptedTransport::new(vec![
            Script::Interrupt,
            Script::Recv(b"VERSION 1.6.21"),
            Script::Interrupt,
            Script::Recv(b"\r\n"),
        ]);
        let mut carry = BytesMut::new();
        let line = read_line(&mut sock, &mut carry).unwrap();
        assert_eq!(b"VERSION 1.6.21".to_vec(), line);
    }

    #[test]
    fn test_read_value_exact() {
        let mut sock = ScriptedTransport::replying(vec![b"value\r\nEND\r\n"]);
        let mut carry = BytesMut::new();
        let value = read_value(&mut sock, &mut carry, 5).unwrap();
        assert_eq!(b"value".to_vec(), value);
        assert_eq!(b"END\r\n"[..], carry[..]);
    }

    #[test]
    fn test_read_value_terminator_straddles_recvs() {
        let mut sock = ScriptedTransport::replying(vec![b"val", b"ue\r", b"\n"]);
        let mut carry = BytesMut::new();
        let value = read_value(&mut sock, &mut carry, 5).unwrap();
        assert_eq!(b"value".to_vec(), value);
        assert!(carry.is_empty());
    }

    #[test]
    fn test_read_value_with_crlf_payload() {
        // a payload containing the terminator sequence must not confuse
        // the length-prefixed read
        let mut sock = ScriptedTransport::replying(vec![b"va\r\nue\r\n"]);
        let mut carry = BytesMut::new();
        let value = read_value(&mut sock, &mut carry, 6).unwrap();
        assert_eq!(b"va\r\nue".to_vec(), value);
    }

    #[test]
    fn test_read_value_uses_carry_first() {
        let mut sock = ScriptedTransport::replying(vec![b"ue\r\ntail"]);
        let mut carry = BytesMut::from(&b"val"[..]);
        let value = read_value(&mut sock, &mut carry, 5).unwrap();
        assert_eq!(b"value".to_vec(), value);
        assert_eq!(b"tail"[..], carry[..]);
    }

    #[test]
    fn test_read_value_unexpected_close() {
        let mut sock = ScriptedTransport::replying(vec![b"val"]);
        let mut carry = BytesMut::new();
        match read_value(&mut sock, &mut carry, 5) {
            Err(Error::UnexpectedClose) => (),
            other => panic!("expected UnexpectedClose, got {:?}", other.map(|_| ())),
        }
    }
}
