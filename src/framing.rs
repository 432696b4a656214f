//! Length-prefixed ASCII framing, shared by every socket in the system.
//!
//! Wire format: a 2-byte unsigned payload length in network byte order,
//! followed by exactly that many ASCII bytes. No trailing NUL on the wire;
//! [`recv_frame`] NUL-terminates the decoded string for callers that want a
//! C-string-shaped buffer, but returns an owned `String` here since nothing
//! downstream needs the raw buffer.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Payloads are clamped to this size on send and rejected above it on
/// receive truncation math.
pub const MAX_PAYLOAD: usize = 65535;

/// How large a line the decoder keeps before draining the rest of an
/// oversize payload into the void. Sized to [`MAX_PAYLOAD`] plus the NUL
/// terminator so every payload a conforming sender can declare (the length
/// header is itself a `u16`) round-trips exactly; the drain-the-remainder
/// path below exists only for a future caller that shrinks this buffer.
pub const RECV_BUF: usize = MAX_PAYLOAD + 1;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("end of stream")]
    Eof,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Sends `payload` as one frame. Payloads longer than [`MAX_PAYLOAD`] are
/// clamped, not rejected — the codec is agnostic to content and callers
/// never legitimately exceed this anyway.
pub fn send_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = payload.len().min(MAX_PAYLOAD) as u16;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&payload[..len as usize])?;
    Ok(())
}

/// Receives one frame. If the sender's declared length exceeds
/// [`RECV_BUF`] minus one (room for the NUL terminator), reads and keeps
/// as many bytes as fit and drains the remainder, so the stream stays in
/// sync for the next frame. The returned string is always a valid,
/// NUL-free Rust `String` (non-UTF8 bytes are replaced), truncated if the
/// original payload did not fit.
pub fn recv_frame<R: Read>(r: &mut R) -> Result<String, FrameError> {
    let mut len_buf = [0u8; 2];
    if let Err(e) = r.read_exact(&mut len_buf) {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof => FrameError::Eof,
            _ => FrameError::Io(e),
        });
    }
    let total = u16::from_be_bytes(len_buf) as usize;
    let keep = total.min(RECV_BUF.saturating_sub(1));
    let mut buf = vec![0u8; keep];
    if keep > 0 {
        r.read_exact(&mut buf)?;
    }
    let remainder = total - keep;
    if remainder > 0 {
        let mut scratch = [0u8; 256];
        let mut left = remainder;
        while left > 0 {
            let chunk = left.min(scratch.len());
            r.read_exact(&mut scratch[..chunk])?;
            left -= chunk;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(payload: &[u8]) -> String {
        let mut buf = Vec::new();
        send_frame(&mut buf, payload).unwrap();
        let mut cursor = Cursor::new(buf);
        recv_frame(&mut cursor).unwrap()
    }

    #[test]
    fn round_trips_short_payload() {
        assert_eq!(round_trip(b"STATUS Closed 1 1"), "STATUS Closed 1 1");
    }

    #[test]
    fn round_trips_empty_payload() {
        assert_eq!(round_trip(b""), "");
    }

    #[test]
    fn eof_on_empty_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(matches!(recv_frame(&mut cursor), Err(FrameError::Eof)));
    }

    #[test]
    fn max_size_payload_round_trips_exactly_and_keeps_sync() {
        // The length header is a `u16`, so no conforming sender can ever
        // declare more than `MAX_PAYLOAD`; `RECV_BUF` is sized to match, so
        // the largest legal frame round-trips whole, and a second frame
        // right behind it is still correctly framed.
        let big = vec![b'x'; MAX_PAYLOAD];
        let mut buf = Vec::new();
        send_frame(&mut buf, &big).unwrap();
        send_frame(&mut buf, b"next").unwrap();

        let mut cursor = Cursor::new(buf);
        let first = recv_frame(&mut cursor).unwrap();
        assert_eq!(first.len(), MAX_PAYLOAD);
        assert!(first.bytes().all(|b| b == b'x'));
        let second = recv_frame(&mut cursor).unwrap();
        assert_eq!(second, "next");
    }

    #[test]
    fn send_clamps_oversize_payload() {
        let mut buf = Vec::new();
        let huge = vec![b'y'; MAX_PAYLOAD + 10];
        send_frame(&mut buf, &huge).unwrap();
        let mut cursor = Cursor::new(buf);
        let got = recv_frame(&mut cursor).unwrap();
        assert_eq!(got.len(), MAX_PAYLOAD);
    }
}
