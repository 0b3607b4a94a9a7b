//! Two-level text splitting.
//!
//! The extractor pushes character runs into a parent buffer; when it
//! reaches 1 MiB (or the stream ends) the buffered text runs through the
//! child splitter, which packs paragraphs, then sentences, then tokens into
//! passages near the target size. Emitted passages are trimmed; their
//! concatenation equals the input up to boundary whitespace.
//!
//! Sizes are counted in characters, not bytes, so CJK-heavy text packs the
//! same as Latin text.

/// Paragraph boundary: a run of two or more newlines.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let run_start = i;
            while i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            if i - run_start >= 2 {
                if run_start > start {
                    paragraphs.push(&text[start..run_start]);
                }
                start = i;
            }
        } else {
            i += 1;
        }
    }
    if start < text.len() {
        paragraphs.push(&text[start..]);
    }
    paragraphs
}

/// Sentence boundaries: after CJK terminal punctuation, or after `.!?;`
/// followed by whitespace (the whitespace run is consumed).
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        match c {
            '。' | '！' | '？' | '；' | '…' => {
                sentences.push(std::mem::take(&mut current));
            }
            '.' | '!' | '?' | ';' => {
                if chars.peek().is_some_and(|n| n.is_whitespace()) {
                    while chars.peek().is_some_and(|n| n.is_whitespace()) {
                        chars.next();
                    }
                    sentences.push(std::mem::take(&mut current));
                }
            }
            _ => {}
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Word tokens: maximal non-whitespace runs with their trailing whitespace
/// attached, so packing without separators loses nothing. Unspaced scripts
/// yield one oversized token and fall through to the character fallback.
fn tokenize(sentence: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_trailing_ws = false;

    for c in sentence.chars() {
        if c.is_whitespace() {
            in_trailing_ws = true;
            current.push(c);
        } else {
            if in_trailing_ws {
                tokens.push(std::mem::take(&mut current));
                in_trailing_ws = false;
            }
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Character fallback for a single token larger than the target.
fn split_by_chars(text: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for c in text.chars() {
        if count + 1 > target && count > 0 {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Greedily pack the tokens of an oversized sentence.
fn split_long_sentence(sentence: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for token in tokenize(sentence) {
        let token_len = token.chars().count();

        if count + token_len > target && count > 0 {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }

        if token_len > target {
            chunks.extend(split_by_chars(&token, target));
        } else {
            current.push_str(&token);
            count += token_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Greedily pack the sentences of an oversized paragraph.
fn split_long_paragraph(paragraph: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for sentence in split_sentences(paragraph) {
        let sentence_len = sentence.chars().count();

        if count + sentence_len > target {
            if count > 0 {
                chunks.push(std::mem::take(&mut current).trim().to_string());
                count = 0;
            }
            if sentence_len > target {
                chunks.extend(split_long_sentence(&sentence, target));
            } else {
                current.push_str(&sentence);
                count = sentence_len;
            }
        } else {
            current.push_str(&sentence);
            count += sentence_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Split text into passages near `target` characters, preferring paragraph
/// boundaries, then sentence boundaries, then word tokens.
pub fn split_text(text: &str, target: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for paragraph in split_paragraphs(text) {
        let paragraph_len = paragraph.chars().count();

        if paragraph_len > target {
            if count > 0 {
                chunks.push(std::mem::take(&mut current).trim().to_string());
                count = 0;
            }
            chunks.extend(split_long_paragraph(paragraph, target));
        } else if count + paragraph_len > target {
            if count > 0 {
                chunks.push(std::mem::take(&mut current).trim().to_string());
            }
            current = paragraph.to_string();
            count = paragraph_len;
        } else {
            if count > 0 {
                current.push_str("\n\n");
                count += 2;
            }
            current.push_str(paragraph);
            count += paragraph_len;
        }
    }

    if count > 0 {
        chunks.push(current.trim().to_string());
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Parent-buffer stage of the two-level split. The parser adapter calls
/// [`TwoLevelSplitter::on_chars`] for each character run and
/// [`TwoLevelSplitter::on_end`] at end of stream; emitted passages flow to
/// the sink in order.
pub struct TwoLevelSplitter<F: FnMut(String)> {
    buffer: String,
    parent_limit: usize,
    target: usize,
    emit: F,
}

impl<F: FnMut(String)> TwoLevelSplitter<F> {
    pub fn new(parent_limit: usize, target: usize, emit: F) -> Self {
        Self {
            buffer: String::new(),
            parent_limit,
            target,
            emit,
        }
    }

    /// Append extracted characters; a full parent buffer flushes through
    /// the child splitter.
    pub fn on_chars(&mut self, chars: &str) {
        self.buffer.push_str(chars);
        if self.buffer.len() >= self.parent_limit {
            self.process_parent();
        }
    }

    /// End of stream: flush whatever remains.
    pub fn on_end(&mut self) {
        if !self.buffer.is_empty() {
            self.process_parent();
        }
    }

    fn process_parent(&mut self) {
        let parent = std::mem::take(&mut self.buffer);
        for passage in split_text(&parent, self.target) {
            (self.emit)(passage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn short_text_is_one_passage() {
        let chunks = split_text("Just a short note.", 100);
        assert_eq!(chunks, vec!["Just a short note.".to_string()]);
    }

    #[test]
    fn paragraphs_pack_greedily() {
        let text = "First paragraph here\n\nSecond paragraph here\n\nThird paragraph here";
        // Target fits two paragraphs (~20 chars each plus separator) but not three.
        let chunks = split_text(text, 48);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("First paragraph"));
        assert!(chunks[0].contains("Second paragraph"));
        assert!(chunks[1].contains("Third paragraph"));
    }

    #[test]
    fn blank_line_runs_are_one_boundary() {
        let text = "one\n\n\n\ntwo";
        let paragraphs = split_paragraphs(text);
        assert_eq!(paragraphs, vec!["one", "two"]);
    }

    #[test]
    fn single_newline_stays_inside_a_paragraph() {
        let paragraphs = split_paragraphs("line one\nline two\n\nnext");
        assert_eq!(paragraphs, vec!["line one\nline two", "next"]);
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu.";
        let chunks = split_text(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30, "chunk too long: {chunk:?}");
        }
        assert!(chunks[0].starts_with("Alpha"));
    }

    #[test]
    fn cjk_terminal_punctuation_breaks_sentences() {
        let sentences = split_sentences("你好。世界！再见？");
        assert_eq!(sentences, vec!["你好。", "世界！", "再见？"]);
    }

    #[test]
    fn ascii_terminators_need_trailing_whitespace() {
        // "3.14" must not split at the decimal point.
        let sentences = split_sentences("Pi is 3.14 exactly. Almost.");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "Pi is 3.14 exactly.");
        assert_eq!(sentences[1], "Almost.");
    }

    #[test]
    fn oversized_sentence_splits_at_tokens() {
        let sentence = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = split_long_sentence(sentence, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20);
        }
        // Tokens carry their whitespace, so nothing is lost.
        assert_eq!(chunks.concat(), sentence);
    }

    #[test]
    fn unspaced_run_falls_back_to_characters() {
        let sentence = "一二三四五六七八九十".repeat(3);
        let chunks = split_long_sentence(&sentence, 8);
        assert!(chunks.len() >= 4);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 8);
        }
        assert_eq!(chunks.concat(), sentence);
    }

    #[test]
    fn round_trip_up_to_boundary_whitespace() {
        let text = "Intro paragraph with words.\n\nSecond one follows here. It has two \
                    sentences.\n\nA third paragraph that is deliberately long enough to be \
                    split into sentence chunks by the splitter logic. Indeed it keeps going \
                    for quite a while to make sure. And then it ends.";
        for target in [20, 40, 80, 1000] {
            let chunks = split_text(text, target);
            assert_eq!(
                normalized(&chunks.concat()),
                normalized(text),
                "content lost at target {target}"
            );
        }
    }

    #[test]
    fn passages_are_trimmed_and_non_empty() {
        let text = "  padded  \n\n\n\n   \n\nnext   ";
        for chunk in split_text(text, 50) {
            assert!(!chunk.is_empty());
            assert_eq!(chunk, chunk.trim());
        }
    }

    #[test]
    fn two_level_splitter_flushes_parent_buffer() {
        let mut passages = Vec::new();
        {
            let mut splitter = TwoLevelSplitter::new(64, 32, |p| passages.push(p));
            // Three pushes exceeding the 64-byte parent limit force a
            // mid-stream flush, then on_end drains the rest.
            splitter.on_chars("First paragraph of the stream.\n\n");
            splitter.on_chars("Second paragraph arrives next here.\n\n");
            splitter.on_chars("Tail piece.");
            splitter.on_end();
        }
        assert!(passages.len() >= 2);
        let merged: String = passages.join(" ");
        assert!(merged.contains("First paragraph"));
        assert!(merged.contains("Tail piece."));
    }

    #[test]
    fn two_level_splitter_empty_stream_emits_nothing() {
        let mut passages: Vec<String> = Vec::new();
        let mut splitter = TwoLevelSplitter::new(1024, 100, |p| passages.push(p));
        splitter.on_end();
        assert!(passages.is_empty());
    }

    #[test]
    fn chunk_ids_would_cover_every_passage() {
        // A parent flush mid-stream must not reset passage ordering.
        let mut passages = Vec::new();
        let mut splitter = TwoLevelSplitter::new(10, 8, |p| passages.push(p));
        splitter.on_chars("aaaa bbbb cccc dddd");
        splitter.on_end();
        assert!(!passages.is_empty());
        assert_eq!(
            normalized(&passages.concat()),
            normalized("aaaa bbbb cccc dddd")
        );
    }
}
