/// Sentence-boundary detection and text clean-up shared by the filters
/// and the generator.

/// Characters that close a sentence.
pub const SENTENCE_ENDERS: &[char] = &['.', '!', '?'];
/// Marker some models emit between documents.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Byte offset just past the last sentence boundary in `text`, or `None`
/// when the text contains no boundary at all.
///
/// A boundary is a sentence ender or the double quote that closes a quoted
/// span. An opening quote is never a boundary.
pub fn last_sentence_end(text: &str) -> Option<usize> {
    let mut quotes = 0usize;
    let mut end = None;
    for (pos, c) in text.char_indices() {
        let boundary = if c == '"' {
            quotes += 1;
            quotes % 2 == 0
        } else {
            SENTENCE_ENDERS.contains(&c)
        };
        if boundary {
            end = Some(pos + c.len_utf8());
        }
    }
    end
}

/// Whether `text`, ignoring surrounding whitespace, finishes exactly on a
/// sentence boundary.
pub fn ends_on_sentence_boundary(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && last_sentence_end(trimmed) == Some(trimmed.len())
}

/// Replace typographic quotes with their ASCII forms.
pub fn formalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{0060}' | '\u{00B4}' => '\'',
            other => other,
        })
        .collect()
}

/// Cut a dangling fragment after the last sentence boundary. Text with no
/// boundary at all is returned unchanged.
pub fn remove_sentence_fragment(text: &str) -> &str {
    match last_sentence_end(text) {
        Some(end) => &text[..end],
        None => text,
    }
}

/// Close an unterminated double-quoted span at the end of `text`.
pub fn fix_end_quote(text: &str) -> String {
    let quotes = text.matches('"').count();
    if quotes % 2 == 1 {
        format!("{}\"", text.trim_end())
    } else {
        text.to_string()
    }
}

/// Collapse runs of spaces and tabs to one space and runs of newlines to
/// one newline, then trim.
pub fn clean_white_space(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending: Option<char> = None;
    for c in text.chars() {
        match c {
            '\n' | '\r' => pending = Some('\n'),
            ' ' | '\t' => {
                if pending != Some('\n') {
                    pending = Some(' ');
                }
            }
            other => {
                if let Some(sep) = pending.take() {
                    if !out.is_empty() {
                        out.push(sep);
                    }
                }
                out.push(other);
            }
        }
    }
    out
}

/// Normalize raw decoder output: keep only the text before the first
/// end-of-text marker and tidy its whitespace.
pub fn clean_generated_text(raw: &str) -> String {
    let head = raw.split(END_OF_TEXT).next().unwrap_or_default();
    clean_white_space(head)
}
