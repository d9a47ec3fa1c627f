//! Decoder for the container runtime's multiplexed log stream.
//!
//! The wire format is a repeating 8-byte header whose last four bytes are a
//! big-endian unsigned 32-bit payload length, followed by exactly that many
//! payload bytes. A clean end of the buffer after a complete frame is a
//! normal stream end; anything else is a truncated frame.

use super::{SandboxError, SandboxResult};

const HEADER_LEN: usize = 8;

/// Strips the framing from a complete buffer of framed log bytes, returning
/// the concatenated payload in stream order.
pub fn demux(mut buf: &[u8]) -> SandboxResult<Vec<u8>> {
    let mut out = Vec::with_capacity(buf.len());
    while !buf.is_empty() {
        if buf.len() < HEADER_LEN {
            return Err(SandboxError::ReadLogsFailed(anyhow::anyhow!(
                "truncated log frame header: {} byte(s) remaining",
                buf.len()
            )));
        }
        let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        buf = &buf[HEADER_LEN..];
        if buf.len() < len {
            return Err(SandboxError::ReadLogsFailed(anyhow::anyhow!(
                "truncated log frame payload: expected {len} byte(s), got {}",
                buf.len()
            )));
        }
        out.extend_from_slice(&buf[..len]);
        buf = &buf[len..];
    }
    Ok(out)
}

pub fn demux_to_string(buf: &[u8]) -> SandboxResult<String> {
    Ok(String::from_utf8_lossy(&demux(buf)?).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream_type, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn empty_buffer_yields_empty_output() {
        assert_eq!(demux(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn single_frame_is_unwrapped() {
        let buf = frame(1, b"hello");
        assert_eq!(demux(&buf).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn interleaved_frames_concatenate_in_stream_order() {
        let mut buf = frame(1, b"out-a");
        buf.extend(frame(2, b"err-a"));
        buf.extend(frame(1, b"out-b"));
        assert_eq!(demux(&buf).unwrap(), b"out-aerr-aout-b".to_vec());
    }

    #[test]
    fn zero_length_payload_frame_contributes_nothing() {
        let buf = frame(1, b"");
        assert_eq!(demux(&buf).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let buf = vec![1, 0, 0, 0, 0];
        assert!(demux(&buf).is_err());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut buf = vec![1, 0, 0, 0];
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"short");
        assert!(demux(&buf).is_err());
    }

    #[test]
    fn demux_to_string_decodes_utf8() {
        let buf = frame(1, "ok\n".as_bytes());
        assert_eq!(demux_to_string(&buf).unwrap(), "ok\n");
    }
}
