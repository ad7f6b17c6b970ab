//! The agent implementations: one module per agent kind, plus the rule-based
//! fallbacks that keep the pipeline limping when cloud providers are out.

pub mod citation;
pub mod concepts;
pub mod discovery;
pub mod metadata;
pub mod processor;
pub mod quality;
pub mod research;
pub mod summarizer;

/// Slice out the JSON payload from a provider response that may be wrapped in
/// markdown fences or prose.
pub(crate) fn json_payload(response: &str) -> Option<&str> {
    let start = response.find(['[', '{'])?;
    let end = response.rfind([']', '}'])?;
    (end >= start).then(|| &response[start..=end])
}

/// Largest char boundary at or below `index`.
pub(crate) fn char_floor(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Smallest char boundary at or above `index`.
pub(crate) fn char_ceil(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Up to `radius` chars of context either side of `[start, end)`.
pub(crate) fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = char_floor(text, start.saturating_sub(radius));
    let to = char_ceil(text, (end + radius).min(text.len()));
    &text[from..to]
}

/// First standalone 4-digit year in `s`, publication-era bounded.
pub(crate) fn find_year(s: &str) -> Option<i32> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let run_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - run_start == 4 {
                if let Ok(year) = s[run_start..i].parse::<i32>() {
                    if (1500..=2100).contains(&year) {
                        return Some(year);
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Naive sentence splitter: terminal punctuation followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_end = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            // Don't split inside decimals like "p<0.05"
            let decimal = c == '.'
                && text[..i].chars().last().is_some_and(|p| p.is_ascii_digit())
                && chars.peek().is_some_and(|(_, next)| next.is_ascii_digit());
            if at_end && !decimal {
                let sentence = text[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = i + c.len_utf8();
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Lowercase alphanumeric slug with single dashes.
pub(crate) fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut last_dash = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}
