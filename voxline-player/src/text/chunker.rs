//! Sentence-aware text chunking
//!
//! Splits text into chunks of at most `max_chunk_length` characters so each
//! chunk fits one provider request. Chunks are contiguous slices of the
//! input: concatenating them gives back the original text exactly.
//!
//! Split points, in order of preference:
//! 1. after a sentence terminator (`.`, `!`, `?`) and the whitespace that follows it
//! 2. inside a whitespace run, for sentences longer than the limit
//!
//! A chunk never ends inside a word. A single word longer than the limit
//! becomes a chunk of its own and is the only way a chunk exceeds it.
//!
//! Lengths are counted in characters, not bytes.

/// Splits text for providers with a per-request character limit.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    max_chunk_length: usize,
}

impl TextChunker {
    /// Chunker with the given limit (clamped to at least 1).
    pub fn new(max_chunk_length: usize) -> Self {
        Self {
            max_chunk_length: max_chunk_length.max(1),
        }
    }

    pub fn max_chunk_length(&self) -> usize {
        self.max_chunk_length
    }

    /// Split `text` into chunks.
    pub fn chunk<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if char_len(text) <= self.max_chunk_length {
            return vec![text];
        }

        let mut packer = Packer::new(text, self.max_chunk_length);

        for (start, end) in sentence_spans(text) {
            let sentence = &text[start..end];
            let length = char_len(sentence);

            if length <= self.max_chunk_length {
                packer.push(end, length);
                continue;
            }

            // Oversized sentence: pack word by word. Whitespace goes one
            // character at a time so a run can be cut anywhere.
            for token in token_spans(text, start, end) {
                if token.is_space {
                    for (offset, c) in text[token.start..token.end].char_indices() {
                        packer.push(token.start + offset + c.len_utf8(), 1);
                    }
                } else {
                    packer.push(token.end, token.chars);
                }
            }
        }

        packer.finish()
    }
}

/// Chunk `text` with a one-off limit.
pub fn chunk_text(text: &str, max_chunk_length: usize) -> Vec<&str> {
    TextChunker::new(max_chunk_length).chunk(text)
}

/// Greedy accumulator over contiguous pieces of `text`.
struct Packer<'a> {
    text: &'a str,
    max: usize,
    /// Byte offset where the open chunk starts
    start: usize,
    /// Byte offset where the open chunk currently ends
    end: usize,
    /// Characters in the open chunk
    chars: usize,
    chunks: Vec<&'a str>,
}

impl<'a> Packer<'a> {
    fn new(text: &'a str, max: usize) -> Self {
        Self {
            text,
            max,
            start: 0,
            end: 0,
            chars: 0,
            chunks: Vec::new(),
        }
    }

    /// Extend by the piece `[self.end, piece_end)` of `piece_chars` characters.
    fn push(&mut self, piece_end: usize, piece_chars: usize) {
        if self.chars + piece_chars <= self.max {
            self.end = piece_end;
            self.chars += piece_chars;
            return;
        }

        self.flush();
        self.end = piece_end;
        self.chars = piece_chars;

        // Atomic piece over the limit stands alone
        if piece_chars > self.max {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.end > self.start {
            self.chunks.push(&self.text[self.start..self.end]);
        }
        self.start = self.end;
        self.chars = 0;
    }

    fn finish(mut self) -> Vec<&'a str> {
        self.flush();
        self.chunks
    }
}

/// Byte spans of sentences. Each span includes its terminator and the
/// whitespace run after it; the spans cover `text` contiguously.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if !chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
            continue;
        }

        let mut end = text.len();
        while let Some(&(index, next)) = chars.peek() {
            if !next.is_whitespace() {
                end = index;
                break;
            }
            chars.next();
        }

        spans.push((start, end));
        start = end;
    }

    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Run of whitespace or non-whitespace characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token {
    start: usize,
    end: usize,
    is_space: bool,
    chars: usize,
}

/// Alternating whitespace / word runs within `text[start..end]`.
fn token_spans(text: &str, start: usize, end: usize) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();

    for (offset, c) in text[start..end].char_indices() {
        let is_space = c.is_whitespace();
        let char_start = start + offset;
        let char_end = char_start + c.len_utf8();
        match tokens.last_mut() {
            Some(last) if last.is_space == is_space => {
                last.end = char_end;
                last.chars += 1;
            }
            _ => tokens.push(Token {
                start: char_start,
                end: char_end,
                is_space,
                chars: 1,
            }),
        }
    }
    tokens
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_word_safe(text: &str, chunks: &[&str]) {
        let mut offset = 0;
        for chunk in &chunks[..chunks.len() - 1] {
            offset += chunk.len();
            let before = text[..offset].chars().next_back();
            let after = text[offset..].chars().next();
            let at_space = before.is_some_and(char::is_whitespace)
                || after.is_some_and(char::is_whitespace);
            assert!(at_space, "split inside a word at byte {}", offset);
        }
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_text("Hello there.", 100), vec!["Hello there."]);
        assert_eq!(chunk_text("", 10), vec![""]);
    }

    #[test]
    fn test_sentences_are_packed_greedily() {
        let text = "One two. Three four! Five six? Seven.";
        let chunks = chunk_text(text, 21);

        assert_eq!(chunks, vec!["One two. Three four! ", "Five six? Seven."]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_terminator_without_space_is_not_a_boundary() {
        let spans = sentence_spans("v1.2 is out. Yes");
        assert_eq!(spans, vec![(0, 13), (13, 16)]);
    }

    #[test]
    fn test_token_runs() {
        let tokens = token_spans("ab  c", 0, 5);
        let runs: Vec<(usize, usize, bool)> = tokens.iter().map(|t| (t.start, t.end, t.is_space)).collect();
        assert_eq!(runs, vec![(0, 2, false), (2, 4, true), (4, 5, false)]);
    }

    #[test]
    fn test_long_sentence_falls_back_to_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_text(text, 12);

        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_word_safe(text, &chunks);
    }

    #[test]
    fn test_oversized_word_stands_alone() {
        let text = "tiny supercalifragilistic end";
        let chunks = chunk_text(text, 8);

        assert_eq!(chunks.concat(), text);
        assert!(chunks.contains(&"supercalifragilistic"));
        for chunk in &chunks {
            if chunk.chars().count() > 8 {
                assert!(!chunk.contains(char::is_whitespace));
            }
        }
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "héllo wörld ñandú";
        let chunks = chunk_text(text, 11);

        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 11));
        assert_word_safe(text, &chunks);
    }

    #[test]
    fn test_twenty_thousand_chars_without_punctuation() {
        let words = ["lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing"];
        let mut text = String::new();
        let mut i = 0;
        while text.chars().count() < 20_000 {
            text.push_str(words[i % words.len()]);
            text.push(' ');
            i += 1;
        }
        let text = text.trim_end();

        let chunks = chunk_text(text, 9000);

        assert!(chunks.len() >= 3);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9000));
        assert_word_safe(text, &chunks);
    }
}
