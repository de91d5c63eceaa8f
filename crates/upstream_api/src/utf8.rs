use std::fmt;
use std::str;

/// Bytes that can never become valid UTF-8, with the text decoded before them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidUtf8 {
    /// Well-formed text preceding the invalid sequence.
    pub decoded: String,
    pub message: String,
}

impl fmt::Display for InvalidUtf8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Decodes a byte stream into text without splitting multi-byte sequences that
/// straddle chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decodes as much of `pending + bytes` as forms complete characters.
    ///
    /// Fails when the bytes can never become valid UTF-8; the error still
    /// carries the text decoded ahead of the invalid sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String, InvalidUtf8> {
        self.pending.extend_from_slice(bytes);

        match str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_owned();
                self.pending.clear();
                Ok(text)
            }
            Err(error) => {
                if let Some(invalid_len) = error.error_len() {
                    let offset = error.valid_up_to();
                    let decoded = String::from_utf8_lossy(&self.pending[..offset]).into_owned();
                    self.pending.clear();
                    return Err(InvalidUtf8 {
                        decoded,
                        message: format!(
                            "invalid UTF-8 sequence of {invalid_len} byte(s) at offset {offset}"
                        ),
                    });
                }

                let valid = error.valid_up_to();
                let tail = self.pending.split_off(valid);
                let head = std::mem::replace(&mut self.pending, tail);
                // `valid_up_to` guarantees the head is well-formed.
                Ok(String::from_utf8_lossy(&head).into_owned())
            }
        }
    }

    /// Reports bytes left over at end of stream.
    pub fn finish(&mut self) -> Result<(), String> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let len = self.pending.len();
        self.pending.clear();
        Err(format!("stream ended inside a {len}-byte UTF-8 sequence"))
    }
}

#[cfg(test)]
mod tests {
    use super::{InvalidUtf8, Utf8ChunkDecoder};

    #[test]
    fn multi_byte_characters_split_across_chunks_are_reassembled() {
        let bytes = "héllo ✓".as_bytes();
        let mut decoder = Utf8ChunkDecoder::default();

        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)).expect("valid utf-8"));
        }

        assert_eq!(text, "héllo ✓");
        decoder.finish().expect("nothing pending");
    }

    #[test]
    fn invalid_bytes_are_reported() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert!(decoder.decode(&[b'a', 0xff, b'b']).is_err());
    }

    #[test]
    fn text_before_an_invalid_byte_is_kept() {
        let mut decoder = Utf8ChunkDecoder::default();

        let error = decoder.decode(b"Hello\xff").expect_err("invalid byte");

        assert_eq!(
            error,
            InvalidUtf8 {
                decoded: "Hello".to_string(),
                message: "invalid UTF-8 sequence of 1 byte(s) at offset 5".to_string(),
            }
        );
    }

    #[test]
    fn held_partial_character_is_included_in_the_kept_text() {
        let mut decoder = Utf8ChunkDecoder::default();
        let check = "✓".as_bytes();
        assert_eq!(decoder.decode(b"ok ").expect("valid"), "ok ");
        assert_eq!(decoder.decode(&check[..1]).expect("incomplete is fine"), "");

        let mut tail = check[1..].to_vec();
        tail.extend_from_slice(b"!\xc3\x28");
        let error = decoder.decode(&tail).expect_err("invalid continuation");

        assert_eq!(error.decoded, "✓!");
        decoder.finish().expect("nothing pending after an error");
    }

    #[test]
    fn truncated_sequence_at_end_is_reported() {
        let mut decoder = Utf8ChunkDecoder::default();
        let check = "✓".as_bytes();
        assert_eq!(decoder.decode(&check[..2]).expect("incomplete is fine"), "");
        assert!(decoder.finish().is_err());
    }
}
