//! Text segmentation for payload-limited speech backends
//!
//! Response text is first stripped of structural markers (bracketed section
//! labels, markdown emphasis) so they are never vocalized, then split on
//! sentence terminators and greedily packed into chunks of bounded length.
//! Lengths are measured in characters, not bytes.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Default chunk bound for the remote path
pub const DEFAULT_MAX_CHUNK_LEN: usize = 380;

/// Marker patterns stripped before speaking
///
/// Bracketed labels like `[summary]`, bold/strike/code fences, single
/// asterisks, and heading hashes at line start.
pub const DEFAULT_MARKER_PATTERNS: [&str; 4] = [
    r"\[[^\]\n]*\]",
    r"\*\*|__|~~|`+",
    r"\*",
    r"(?m)^[ \t]*#{1,6}[ \t]*",
];

/// A terminated run of text, terminator(s) included, or a trailing run without one
static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^。！？；.!?;\n]*[。！？；.!?;\n]+|[^。！？；.!?;\n]+")
        .expect("sentence pattern is valid")
});

static DEFAULT_STRIPPER: LazyLock<MarkerStripper> = LazyLock::new(|| {
    MarkerStripper::new(&DEFAULT_MARKER_PATTERNS).expect("built-in marker patterns are valid")
});

/// One speech-synthesis unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position in the segmented sequence
    pub index: usize,
    /// Chunk text, terminators included
    pub text: String,
}

impl TextChunk {
    /// Length in characters
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Whether the chunk carries nothing speakable
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Removes structural markers from text before it is spoken
///
/// Decouples segmentation from any one prompt format: callers add the marker
/// patterns their prompt schema emits.
#[derive(Debug, Clone)]
pub struct MarkerStripper {
    patterns: Vec<Regex>,
}

impl Default for MarkerStripper {
    fn default() -> Self {
        DEFAULT_STRIPPER.clone()
    }
}

impl MarkerStripper {
    /// Build a stripper from regex patterns
    ///
    /// # Errors
    ///
    /// Returns error if any pattern fails to compile
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    Error::Config(format!("invalid marker pattern {:?}: {e}", p.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Default patterns followed by `extra`
    ///
    /// # Errors
    ///
    /// Returns error if any extra pattern fails to compile
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut stripper = Self::default();
        stripper.patterns.extend(Self::new(extra)?.patterns);
        Ok(stripper)
    }

    /// Strip every marker and trim surrounding whitespace
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for pattern in &self.patterns {
            if let std::borrow::Cow::Owned(replaced) = pattern.replace_all(&cleaned, "") {
                cleaned = replaced;
            }
        }
        cleaned.trim().to_string()
    }
}

/// Splits response text into bounded chunks
#[derive(Debug, Clone)]
pub struct Segmenter {
    stripper: MarkerStripper,
    max_len: usize,
}

impl Segmenter {
    /// Create a segmenter; a `max_len` of 0 uses [`DEFAULT_MAX_CHUNK_LEN`]
    #[must_use]
    pub fn new(stripper: MarkerStripper, max_len: usize) -> Self {
        let max_len = if max_len == 0 {
            DEFAULT_MAX_CHUNK_LEN
        } else {
            max_len
        };
        Self { stripper, max_len }
    }

    /// The chunk bound in characters
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Strip markers without splitting
    #[must_use]
    pub fn clean(&self, text: &str) -> String {
        self.stripper.strip(text)
    }

    /// Strip markers, then split into chunks
    #[must_use]
    pub fn segment(&self, text: &str) -> Vec<TextChunk> {
        split_cleaned(&self.clean(text), self.max_len)
    }
}

/// Segment `text` with the default marker patterns
#[must_use]
pub fn segment(text: &str, max_len: usize) -> Vec<TextChunk> {
    Segmenter::new(MarkerStripper::default(), max_len).segment(text)
}

/// Split already-cleaned text into chunks of at most `max_len` characters
///
/// Terminated runs are packed greedily; a run is never broken, so a single
/// run longer than `max_len` becomes its own oversized chunk. Blank input
/// yields one chunk holding the input so callers always get a unit to process.
#[must_use]
pub fn split_cleaned(cleaned: &str, max_len: usize) -> Vec<TextChunk> {
    let max_len = max_len.max(1);

    if cleaned.trim().is_empty() {
        return vec![TextChunk {
            index: 0,
            text: cleaned.to_string(),
        }];
    }

    let mut texts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for run in SENTENCE.find_iter(cleaned) {
        let run = run.as_str();
        let run_len = run.chars().count();

        if !current.is_empty() && current_len + run_len > max_len {
            texts.push(std::mem::take(&mut current));
            current_len = 0;
        }

        current.push_str(run);
        current_len += run_len;
    }

    if !current.is_empty() {
        texts.push(current);
    }

    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk { index, text })
        .collect()
}
