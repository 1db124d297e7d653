//! Word frequency counting.

use std::collections::HashMap;
use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Tokens of this many characters or fewer are ignored.
const MAX_SKIPPED_LEN: usize = 4;

/// Punctuation stripped from both ends of a token.
const TRIM_CHARS: &[char] = &['.', ',', '"', '\'', '?', '!'];

/// A word and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub count: u64,
}

impl Word {
    pub fn new(word: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            count,
        }
    }
}

/// Words ordered by descending count.
pub type Words = Vec<Word>;

/// Running tally of qualifying words.
#[derive(Debug, Default)]
pub struct WordTally {
    counts: HashMap<String, u64>,
}

impl WordTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every whitespace separated token of `text`.
    pub fn add_text(&mut self, text: &str) {
        for token in text.split_whitespace() {
            self.add_token(token);
        }
    }

    fn add_token(&mut self, token: &str) {
        let lower = token.to_lowercase();
        // Length is checked before trimming, then again on the trimmed word.
        if lower.chars().count() <= MAX_SKIPPED_LEN {
            return;
        }
        let trimmed = lower.trim_matches(TRIM_CHARS);
        if trimmed.chars().count() <= MAX_SKIPPED_LEN {
            return;
        }
        *self.counts.entry(trimmed.to_string()).or_insert(0) += 1;
    }

    /// Number of distinct words seen so far.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// The `limit` most frequent words. Equal counts are ordered alphabetically.
    pub fn top(self, limit: usize) -> Words {
        let mut words: Words = self
            .counts
            .into_iter()
            .map(|(word, count)| Word { word, count })
            .collect();
        words.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
        words.truncate(limit);
        words
    }
}

/// Count the `limit` most frequent words in a stream.
///
/// Any read error aborts the count; no partial result is returned. Bytes that
/// are not valid UTF-8 are replaced with U+FFFD, so text in other encodings
/// still has its ASCII words counted.
pub async fn count_top_words<R>(mut reader: R, limit: usize) -> io::Result<Words>
where
    R: AsyncBufRead + Unpin,
{
    let mut tally = WordTally::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        tally.add_text(&String::from_utf8_lossy(&line));
    }
    Ok(tally.top(limit))
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

    use super::*;

    async fn count(text: &str, limit: usize) -> Words {
        count_top_words(text.as_bytes(), limit)
            .await
            .expect("in-memory read cannot fail")
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    #[tokio::test]
    async fn counts_and_orders_words() {
        let words = count("alphabet alphabet banana carrot", 10).await;
        assert_eq!(
            words,
            vec![
                Word::new("alphabet", 2),
                Word::new("banana", 1),
                Word::new("carrot", 1),
            ]
        );
    }

    #[tokio::test]
    async fn short_words_are_ignored() {
        assert!(count("the is a an", 10).await.is_empty());
    }

    #[tokio::test]
    async fn lowercases_and_trims_punctuation() {
        let words = count("Hello, hello! \"HELLO\" 'world'? world.", 10).await;
        assert_eq!(words, vec![Word::new("hello", 3), Word::new("world", 2)]);
    }

    #[tokio::test]
    async fn words_short_after_trimming_are_dropped() {
        // Long enough before trimming, too short after.
        assert!(count("abc!! ...hi \"''\"", 10).await.is_empty());
    }

    #[tokio::test]
    async fn inner_punctuation_is_kept() {
        let words = count("don't don't e.g.,. state-of-the-art", 10).await;
        assert_eq!(
            words,
            vec![Word::new("don't", 2), Word::new("state-of-the-art", 1)]
        );
    }

    #[tokio::test]
    async fn truncates_to_limit() {
        let text = "aaaaa aaaaa aaaaa bbbbb bbbbb ccccc ddddd";
        let words = count(text, 2).await;
        assert_eq!(words, vec![Word::new("aaaaa", 3), Word::new("bbbbb", 2)]);
        assert!(count(text, 0).await.is_empty());
    }

    #[tokio::test]
    async fn splits_across_lines_and_tabs() {
        let words = count("first\tsecond\nsecond\r\nthird  first\n\nfirst", 10).await;
        assert_eq!(
            words,
            vec![
                Word::new("first", 3),
                Word::new("second", 2),
                Word::new("third", 1),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_runs_agree() {
        let text = "zebra yellow xenon zebra yellow zebra apple apple mango";
        assert_eq!(count(text, 10).await, count(text, 10).await);
    }

    #[tokio::test]
    async fn results_are_sorted_and_bounded() {
        let text = "lorem ipsum dolor sit amet, consectetur adipiscing elit. \
                    Lorem ipsum! dolor? amet amet consectetur lorem";
        let words = count(text, 3).await;
        assert!(words.len() <= 3);
        assert!(words.windows(2).all(|w| w[0].count >= w[1].count));
        for w in &words {
            assert!(w.word.chars().count() > MAX_SKIPPED_LEN);
            assert!(!w.word.starts_with(TRIM_CHARS) && !w.word.ends_with(TRIM_CHARS));
        }
        assert_eq!(words[0], Word::new("lorem", 3));
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let reader = BufReader::new((&b"plenty of words here "[..]).chain(FailingReader));
        let err = count_top_words(reader, 10).await.expect_err("must fail");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn latin1_text_still_counts_ascii_words() {
        let bytes: &[u8] = b"alphabet alphabet r\xe9sum\xe9 carrot\n\xff\xfe";
        let words = count_top_words(bytes, 10).await.expect("lossy decode");
        assert_eq!(words[0], Word::new("alphabet", 2));
        assert!(words.contains(&Word::new("carrot", 1)));
        assert!(words.contains(&Word::new("r\u{fffd}sum\u{fffd}", 1)));
        assert_eq!(words.len(), 3);
    }

    #[test]
    fn tally_tracks_distinct_words() {
        let mut tally = WordTally::new();
        tally.add_text("apple apple banana");
        tally.add_text("cherry");
        assert_eq!(tally.distinct(), 3);
    }
}
