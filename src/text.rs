//! Pre-send text sanitisation for the speech-synthesis announcer.
//!
//! Two filters are required for correct output: directional embedding marks
//! must be stripped (some engines read them aloud), and literal `<br>` tags —
//! which reach us from alert content authored for live regions — must be
//! replaced with breathing room rather than spoken as markup.

/// Unicode directional embedding/override marks that speech engines read
/// aloud. LRE, RLE, PDF, the override forms, and the isolate forms.
const EMBEDDING_MARKS: [char; 9] = [
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}', '\u{2066}', '\u{2067}',
    '\u{2068}', '\u{2069}',
];

/// Prepare resolved alert text for submission to a speech platform.
///
/// Strips embedding marks, replaces `<br>`/`<br/>` tags with a space, and
/// collapses the runs of whitespace that replacement can leave behind.
#[must_use]
pub fn sanitize_for_speech(text: &str) -> String {
    let without_marks = strip_embedding_marks(text);
    let without_brs = strip_br_tags(&without_marks);
    collapse_spaces(&without_brs)
}

/// Remove directional embedding marks.
#[must_use]
pub fn strip_embedding_marks(text: &str) -> String {
    text.chars().filter(|c| !EMBEDDING_MARKS.contains(c)).collect()
}

/// Replace `<br>` and `<br/>` tags (any case, optional inner whitespace)
/// with a single space.
#[must_use]
pub fn strip_br_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        let (before, tail) = rest.split_at(open);
        result.push_str(before);

        match br_tag_len(tail) {
            Some(len) => {
                result.push(' ');
                rest = &tail[len..];
            }
            None => {
                result.push('<');
                rest = &tail[1..];
            }
        }
    }
    result.push_str(rest);
    result
}

/// If `tail` (starting at `<`) opens a br tag, return the tag's byte length.
fn br_tag_len(tail: &str) -> Option<usize> {
    let mut chars = tail.char_indices();
    chars.next(); // consume '<'

    for expected in ['b', 'r'] {
        let (_, c) = chars.next()?;
        if c.to_ascii_lowercase() != expected {
            return None;
        }
    }

    // Optional whitespace, optional '/', then '>'.
    let mut seen_slash = false;
    for (i, c) in chars {
        match c {
            '>' => return Some(i + 1),
            '/' if !seen_slash => seen_slash = true,
            c if c.is_whitespace() && !seen_slash => {}
            _ => return None,
        }
    }
    None
}

fn collapse_spaces(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_space = false;

    for c in text.chars() {
        if c == ' ' {
            if !prev_space {
                result.push(c);
            }
            prev_space = true;
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    result.trim().to_string()
}
