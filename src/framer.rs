// src/framer.rs
//
// Delimiter-based tokenizer for the line protocol spoken by the micro:bit.
// Raw chunks arrive with arbitrary boundaries; complete tokens are the bytes
// strictly between two delimiters.

// =============================================================================
// Constants
// =============================================================================

/// Line feed, the only framing byte on the wire
pub const DELIMITER: u8 = 0x0A;

// =============================================================================
// Types
// =============================================================================

/// A complete token extracted from the byte stream, delimiter excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    bytes: Vec<u8>,
}

impl Token {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// =============================================================================
// Tokenizer
// =============================================================================

/// Accumulates a partial token across `feed` calls.
///
/// The buffer never holds a delimiter byte and is emptied as soon as a token
/// is emitted. Adjacent delimiters produce zero-length tokens.
#[derive(Debug)]
pub struct Tokenizer {
    buffer: Vec<u8>,
    delimiter: u8,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::new(DELIMITER)
    }
}

impl Tokenizer {
    pub fn new(delimiter: u8) -> Self {
        Tokenizer {
            buffer: Vec::new(),
            delimiter,
        }
    }

    /// Feed a chunk and hand each completed token to `on_token` as soon as it
    /// is found. Tokens are produced in stream order.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_token: F)
    where
        F: FnMut(Token),
    {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == self.delimiter) {
            self.buffer.extend_from_slice(&rest[..pos]);
            on_token(Token {
                bytes: std::mem::take(&mut self.buffer),
            });
            rest = &rest[pos + 1..];
        }
        self.buffer.extend_from_slice(rest);
    }

    /// Feed a chunk and collect the completed tokens.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Token> {
        let mut tokens = Vec::new();
        self.feed_with(chunk, |token| tokens.push(token));
        tokens
    }

    /// Number of bytes held for the token currently being received
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(tokens: &[Token]) -> Vec<&[u8]> {
        tokens.iter().map(|t| t.as_bytes()).collect()
    }

    #[test]
    fn test_single_chunk_multiple_tokens() {
        let mut tokenizer = Tokenizer::default();
        let tokens = tokenizer.feed(b"Pitch -12\nRoll 5\n");
        assert_eq!(bytes_of(&tokens), vec![&b"Pitch -12"[..], &b"Roll 5"[..]]);
        assert_eq!(tokenizer.pending_len(), 0);
    }

    #[test]
    fn test_partial_token_persists_across_feeds() {
        let mut tokenizer = Tokenizer::default();
        assert!(tokenizer.feed(b"Graph").is_empty());
        assert!(tokenizer.feed(b"ics Pi").is_empty());
        assert_eq!(tokenizer.pending_len(), 11);

        let tokens = tokenizer.feed(b"tch 3\nRo");
        assert_eq!(bytes_of(&tokens), vec![&b"Graphics Pitch 3"[..]]);
        assert_eq!(tokenizer.pending_len(), 2);
    }

    #[test]
    fn test_adjacent_delimiters_emit_empty_tokens() {
        let mut tokenizer = Tokenizer::default();
        let tokens = tokenizer.feed(b"\n\nA\n");
        assert_eq!(tokens.len(), 3);
        assert!(tokens[0].is_empty());
        assert!(tokens[1].is_empty());
        assert_eq!(tokens[2].as_bytes(), b"A");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut tokenizer = Tokenizer::default();
        tokenizer.feed(b"abc");
        assert!(tokenizer.feed(b"").is_empty());
        assert_eq!(tokenizer.pending_len(), 3);
    }

    #[test]
    fn test_trailing_partial_is_not_delivered() {
        let mut tokenizer = Tokenizer::default();
        let tokens = tokenizer.feed(b"one\ntwo\nthr");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokenizer.pending_len(), 3);
    }

    #[test]
    fn test_chunk_size_invariance() {
        let stream: &[u8] = b"MIDI NoteOn 1 2 3\n\nGraphics Knob 0 7\nOther stuff\nleft";

        let mut whole = Tokenizer::default();
        let expected = whole.feed(stream);
        assert_eq!(expected.len(), 4);

        for size in 1..=stream.len() {
            let mut tokenizer = Tokenizer::default();
            let mut got = Vec::new();
            for chunk in stream.chunks(size) {
                got.extend(tokenizer.feed(chunk));
            }
            assert_eq!(got, expected, "chunk size {}", size);
            assert_eq!(tokenizer.pending_len(), 4);
        }
    }

    #[test]
    fn test_many_delimiters_do_not_recurse() {
        let mut tokenizer = Tokenizer::default();
        let chunk = vec![DELIMITER; 100_000];
        let mut count = 0;
        tokenizer.feed_with(&chunk, |token| {
            assert!(token.is_empty());
            count += 1;
        });
        assert_eq!(count, 100_000);
    }

    #[test]
    fn test_custom_delimiter() {
        let mut tokenizer = Tokenizer::new(b';');
        let tokens = tokenizer.feed(b"a;b\n;");
        assert_eq!(bytes_of(&tokens), vec![&b"a"[..], &b"b\n"[..]]);
    }
}
