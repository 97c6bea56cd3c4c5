//! @ai:module:intent Incremental Server-Sent Events frame decoder
//! @ai:module:layer infrastructure
//! @ai:module:public_api SseDecoder, SseFrame
//! @ai:module:stateless false

use tracing::warn;

/// Upper bound on bytes held for one unfinished frame
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// @ai:intent One decoded frame of a provider stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// @ai:intent Buffers raw bytes and yields complete frames
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a separator
    scanned: usize,
    overflowed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// @ai:intent Append bytes and return every frame completed by them
    /// @ai:post a frame split across calls is returned exactly once
    /// @ai:effects state:write
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();

        while let Some((end, sep_len)) = find_frame_end(&self.buffer, self.scanned) {
            let raw: Vec<u8> = self.buffer.drain(..end + sep_len).collect();
            self.scanned = 0;
            // Decoding whole frames keeps multi-byte characters split across chunks intact
            let text = String::from_utf8_lossy(&raw[..end]);
            if let Some(frame) = parse_frame(&text) {
                frames.push(frame);
            }
            self.overflowed = false;
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_BUFFER_SIZE {
            if !self.overflowed {
                warn!(
                    "SSE frame exceeded {} bytes without a terminator, discarding",
                    MAX_BUFFER_SIZE
                );
                self.overflowed = true;
            }
            self.buffer.clear();
            self.scanned = 0;
        }

        frames
    }

    /// @ai:intent Decode whatever is left once the connection closed
    /// @ai:effects state:write
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_frame(&String::from_utf8_lossy(&raw))
    }
}

/// Position and length of the first blank-line separator at or after `scanned`
///
/// A separator may straddle the previous scan boundary, so the search backs up
/// by one separator length minus one.
fn find_frame_end(buffer: &[u8], scanned: usize) -> Option<(usize, usize)> {
    let start = scanned.saturating_sub(3).min(buffer.len());
    let tail = &buffer[start..];
    let lf = tail.windows(2).position(|w| w == b"\n\n").map(|p| (start + p, 2));
    let crlf = tail.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (start + p, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        // Comment lines such as ": OPENROUTER PROCESSING" keep the connection alive
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    if data.trim() == "[DONE]" {
        return Some(SseFrame::Done);
    }

    Some(SseFrame::Data(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decodes_complete_frames() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::Data("{\"a\":1}".to_string()), SseFrame::Done]
        );
    }

    #[test]
    fn test_frame_split_across_chunks_decodes_once() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"content\":").is_empty());
        assert!(decoder.feed(b"\"hi\"}\n").is_empty());
        let frames = decoder.feed(b"\n");
        assert_eq!(frames, vec![SseFrame::Data("{\"content\":\"hi\"}".to_string())]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "data: é\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        // Split inside the two-byte encoding of 'é'
        assert!(decoder.feed(&text[..7]).is_empty());
        let frames = decoder.feed(&text[7..]);
        assert_eq!(frames, vec![SseFrame::Data("é".to_string())]);
    }

    #[test]
    fn test_comments_and_other_fields_are_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": OPENROUTER PROCESSING\n\nevent: message\ndata:{}\n\n");
        assert_eq!(frames, vec![SseFrame::Data("{}".to_string())]);
    }

    #[test]
    fn test_crlf_separators() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: x\r\n\r\ndata: [DONE]\r\n\r\n");
        assert_eq!(frames, vec![SseFrame::Data("x".to_string()), SseFrame::Done]);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), Some(SseFrame::Done));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_separator_split_at_every_offset() {
        let input = b"data: a\r\n\r\ndata: b\n\n";
        for split in 1..input.len() {
            let mut decoder = SseDecoder::new();
            let mut frames = decoder.feed(&input[..split]);
            frames.extend(decoder.feed(&input[split..]));
            assert_eq!(
                frames,
                vec![SseFrame::Data("a".to_string()), SseFrame::Data("b".to_string())],
                "split at {}",
                split
            );
        }
    }

    #[test]
    fn test_large_frame_in_small_chunks_is_scanned_incrementally() {
        let payload = "x".repeat(64 * 1024);
        let input = format!("data: {}\n\n", payload);
        let mut decoder = SseDecoder::new();

        let mut frames = Vec::new();
        for chunk in input.as_bytes().chunks(7) {
            frames.extend(decoder.feed(chunk));
            if frames.is_empty() {
                assert_eq!(decoder.scanned, decoder.buffer.len());
            }
        }

        assert_eq!(frames, vec![SseFrame::Data(payload)]);
        assert_eq!(decoder.scanned, 0);
        assert!(decoder.buffer.is_empty());
    }
}
