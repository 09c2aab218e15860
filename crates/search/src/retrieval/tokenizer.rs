//! Tokenizer and normalizer for keyword scoring
//!
//! Documents and queries go through the same pipeline so that their terms
//! meet in the same space:
//! 1. lowercase
//! 2. split into word runs and single punctuation marks
//! 3. drop stop words, punctuation, and tokens of one character
//! 4. reduce the survivors to a base form with a small rule lemmatizer
//!
//! When every token is filtered out, the alphabetic tokens longer than one
//! character are returned unfiltered instead, so short stop-word-only
//! text still produces terms.

use docresearch_common::config::TokenizerConfig;
use docresearch_common::errors::{AppError, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// English stop words
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "an",
    "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "back", "be", "became", "because", "become", "becomes", "been",
    "before", "beforehand", "behind", "being", "below", "beside", "besides", "between", "beyond",
    "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "don", "done",
    "down", "due", "during", "each", "either", "else", "elsewhere", "enough", "even", "ever",
    "every", "everyone", "everything", "everywhere", "except", "few", "for", "former",
    "formerly", "from", "further", "had", "has", "have", "having", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hers", "herself", "him", "himself", "his", "how",
    "however", "if", "in", "indeed", "into", "is", "it", "its", "itself", "just", "last",
    "latter", "least", "less", "many", "may", "me", "meanwhile", "might", "mine", "more",
    "moreover", "most", "mostly", "much", "must", "my", "myself", "neither", "never",
    "nevertheless", "next", "no", "nobody", "none", "nor", "not", "nothing", "now", "nowhere",
    "of", "off", "often", "on", "once", "only", "onto", "or", "other", "others", "otherwise",
    "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps", "please", "quite",
    "rather", "re", "really", "same", "seem", "seemed", "seeming", "seems", "several", "she",
    "should", "since", "so", "some", "somehow", "someone", "something", "sometime",
    "sometimes", "somewhere", "still", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "thence", "there", "thereafter", "thereby", "therefore", "therein",
    "these", "they", "this", "those", "though", "through", "throughout", "thru", "thus", "to",
    "together", "too", "toward", "towards", "under", "unless", "until", "up", "upon", "us",
    "very", "via", "was", "we", "well", "were", "what", "whatever", "when", "whence",
    "whenever", "where", "whereafter", "whereas", "whereby", "wherein", "whereupon",
    "wherever", "whether", "which", "while", "whither", "who", "whoever", "whole", "whom",
    "whose", "why", "will", "with", "within", "without", "would", "yet", "you", "your",
    "yours", "yourself", "yourselves",
];

/// Irregular forms the suffix rules cannot recover
const IRREGULAR_LEMMAS: &[(&str, &str)] = &[
    ("ran", "run"),
    ("went", "go"),
    ("gone", "go"),
    ("knew", "know"),
    ("known", "know"),
    ("made", "make"),
    ("wrote", "write"),
    ("written", "write"),
    ("took", "take"),
    ("taken", "take"),
    ("saw", "see"),
    ("seen", "see"),
    ("got", "get"),
    ("found", "find"),
    ("built", "build"),
    ("led", "lead"),
    ("held", "hold"),
    ("began", "begin"),
    ("begun", "begin"),
    ("thought", "think"),
    ("brought", "bring"),
    ("taught", "teach"),
    ("children", "child"),
    ("men", "man"),
    ("women", "woman"),
    ("people", "person"),
    ("mice", "mouse"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("better", "good"),
    ("best", "good"),
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenKind {
    Word,
    Punct,
}

/// Stateless text normalizer shared by every keyword index
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl Tokenizer {
    /// Tokenizer with the built-in stop list only
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration, loading the extra stop-word file if set.
    ///
    /// A missing or unreadable file is a configuration error, surfaced at
    /// startup rather than per call.
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        match &config.stop_words_path {
            Some(path) => Self::with_stop_words_file(path),
            None => Ok(Self::new()),
        }
    }

    /// Built-in stop list extended with one word per line from `path`.
    /// Blank lines and lines starting with `#` are ignored.
    pub fn with_stop_words_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| AppError::Configuration {
            message: format!("Failed to load stop words from {}: {}", path.display(), e),
        })?;

        let mut tokenizer = Self::new();
        let before = tokenizer.stop_words.len();
        tokenizer.extend_stop_words(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        );

        info!(
            path = %path.display(),
            added = tokenizer.stop_words.len() - before,
            "Loaded extra stop words"
        );
        Ok(tokenizer)
    }

    pub fn extend_stop_words<'a>(&mut self, words: impl IntoIterator<Item = &'a str>) {
        self.stop_words
            .extend(words.into_iter().map(|w| w.to_lowercase()));
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// Normalize `text` into index terms
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let lowered = text.to_lowercase();
        let raw = split_tokens(&lowered);

        let tokens: Vec<String> = raw
            .iter()
            .filter(|(token, kind)| {
                *kind == TokenKind::Word
                    && token.chars().count() > 1
                    && !self.stop_words.contains(*token)
            })
            .map(|(token, _)| lemmatize(token))
            .collect();

        if !tokens.is_empty() {
            return tokens;
        }

        raw.iter()
            .filter(|(token, _)| token.chars().count() > 1 && token.chars().all(char::is_alphabetic))
            .map(|(token, _)| token.to_string())
            .collect()
    }
}

/// Split into alphanumeric runs and single non-space symbols
fn split_tokens(text: &str) -> Vec<(&str, TokenKind)> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if word_start.is_none() {
                word_start = Some(i);
            }
            continue;
        }

        if let Some(start) = word_start.take() {
            tokens.push((&text[start..i], TokenKind::Word));
        }
        if !c.is_whitespace() {
            tokens.push((&text[i..i + c.len_utf8()], TokenKind::Punct));
        }
    }

    if let Some(start) = word_start {
        tokens.push((&text[start..], TokenKind::Word));
    }

    tokens
}

/// Reduce a lowercase word to its base form
fn lemmatize(word: &str) -> String {
    if let Some((_, lemma)) = IRREGULAR_LEMMAS.iter().find(|(form, _)| *form == word) {
        return lemma.to_string();
    }

    // Numbers and mixed tokens stay as written
    if !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return word.to_string();
    }

    let len = word.len();

    if len > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..len - 3]);
    }
    if word.ends_with("sses") {
        return word[..len - 2].to_string();
    }
    if ["ches", "shes", "xes", "zes"].iter().any(|s| word.ends_with(s)) {
        return word[..len - 2].to_string();
    }
    if len > 5 && word.ends_with("ing") {
        return restore_stem(&word[..len - 3]);
    }
    if len > 4 && word.ends_with("ed") && !word.ends_with("eed") {
        return restore_stem(&word[..len - 2]);
    }
    if len > 3
        && word.ends_with('s')
        && !["ss", "us", "is"].iter().any(|s| word.ends_with(s))
    {
        return word[..len - 1].to_string();
    }

    word.to_string()
}

/// Undo consonant doubling ("runn" -> "run") or restore a silent e ("mak" -> "make")
fn restore_stem(stem: &str) -> String {
    let bytes = stem.as_bytes();
    let n = bytes.len();

    if n >= 2 && bytes[n - 1] == bytes[n - 2] && is_consonant(bytes[n - 1]) {
        if !matches!(bytes[n - 1], b'l' | b's' | b'z') {
            return stem[..n - 1].to_string();
        }
        return stem.to_string();
    }

    if n == 3
        && is_consonant(bytes[0])
        && !is_consonant(bytes[1])
        && is_consonant(bytes[2])
        && !matches!(bytes[2], b'w' | b'x' | b'y')
    {
        return format!("{}e", stem);
    }

    stem.to_string()
}

fn is_consonant(b: u8) -> bool {
    !matches!(b, b'a' | b'e' | b'i' | b'o' | b'u')
}
