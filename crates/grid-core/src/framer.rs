//! Byte-stream <-> payload transform.
//!
//! A payload is the longest prefix of the buffer such that the byte three
//! positions before the next newline is EOT (`0x04`). A valid incoming
//! message ends with `0x04, c0, c1, 0x0A`. The Framer deliberately never
//! validates `c0`/`c1` — those checksum bytes are owned by the lower codec.

const EOT: u8 = 0x04;
const NEWLINE: u8 = 0x0A;
/// Buffers at or beyond this size with no delimiter are reset.
const MAX_BUFFER: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramerError {
    #[error("framing overflow: buffer exceeded {MAX_BUFFER} bytes with no delimiter")]
    Overflow,
}

#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-arrived bytes; returns every complete payload now available,
    /// in arrival order.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FramerError> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        loop {
            match self.take_one()? {
                Some(payload) => payloads.push(payload),
                None => break,
            }
        }
        Ok(payloads)
    }

    fn take_one(&mut self) -> Result<Option<Vec<u8>>, FramerError> {
        // Scan every newline in arrival order; a newline only terminates a
        // frame when the byte three positions before it is EOT. Newlines
        // that don't satisfy that are ordinary payload bytes (e.g. embedded
        // in free-form debug text) and stay buffered.
        let terminator = self
            .buffer
            .iter()
            .enumerate()
            .filter(|&(i, &b)| b == NEWLINE && i >= 3 && self.buffer[i - 3] == EOT)
            .map(|(i, _)| i)
            .next();

        let Some(newline_at) = terminator else {
            if self.buffer.len() >= MAX_BUFFER {
                self.buffer.clear();
                return Err(FramerError::Overflow);
            }
            return Ok(None);
        };

        let payload = self.buffer[..newline_at].to_vec();
        self.buffer.drain(..=newline_at);
        Ok(Some(payload))
    }

    /// Remaining bytes are discarded, never emitted as a partial frame.
    pub fn finish(self) {}

    /// Outbound framing is trivial: append a single `0x0A`.
    pub fn frame_outbound(payload: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(NEWLINE);
        framed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_two_payloads_from_concatenated_frames() {
        let input: &[u8] = &[
            0x41, 0x04, 0xAA, 0xBB, 0x0A, 0x42, 0x04, 0xCC, 0xDD, 0x0A,
        ];
        let mut framer = Framer::new();
        let payloads = framer.push(input).unwrap();
        assert_eq!(payloads, vec![vec![0x41, 0x04, 0xAA, 0xBB], vec![0x42, 0x04, 0xCC, 0xDD]]);
    }

    #[test]
    fn invariant_arbitrary_chunk_boundaries_reassemble_identically() {
        let input: Vec<u8> = vec![
            0x41, 0x04, 0xAA, 0xBB, 0x0A, 0x42, 0x04, 0xCC, 0xDD, 0x0A, 0x43, 0x04, 0xEE, 0xFF,
            0x0A,
        ];
        let expected = vec![
            vec![0x41, 0x04, 0xAA, 0xBB],
            vec![0x42, 0x04, 0xCC, 0xDD],
            vec![0x43, 0x04, 0xEE, 0xFF],
        ];

        for split_at in 0..input.len() {
            let (first, second) = input.split_at(split_at);
            let mut framer = Framer::new();
            let mut out = framer.push(first).unwrap();
            out.extend(framer.push(second).unwrap());
            assert_eq!(out, expected, "split at {split_at} produced different payloads");
        }
    }

    #[test]
    fn no_partial_frame_is_ever_emitted() {
        let mut framer = Framer::new();
        let payloads = framer.push(&[0x41, 0x04, 0xAA, 0xBB]).unwrap();
        assert!(payloads.is_empty());
    }

    #[test]
    fn oversized_buffer_without_delimiter_raises_framing_error() {
        let mut framer = Framer::new();
        let junk = vec![b'x'; MAX_BUFFER];
        let result = framer.push(&junk);
        assert!(matches!(result, Err(FramerError::Overflow)));
    }

    #[test]
    fn remaining_bytes_on_stream_end_are_discarded() {
        let mut framer = Framer::new();
        framer.push(&[0x41, 0x42, 0x43]).unwrap();
        framer.finish();
        // No payload was ever produced for the dangling bytes; nothing to
        // assert beyond "this doesn't panic and drops the buffer".
    }

    #[test]
    fn outbound_framing_appends_single_newline() {
        assert_eq!(Framer::frame_outbound(&[1, 2, 3]), vec![1, 2, 3, 0x0A]);
    }
}
