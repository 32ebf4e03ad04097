//! Splits outgoing text into fragments that fit the destination's message limit

/// Maximum message length accepted by the chat destination
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Split `text` into fragments of at most `max_len` characters.
///
/// Fragments break on line boundaries where possible; a single line longer
/// than `max_len` is hard-split every `max_len` characters. Except where a
/// line was hard-split, joining the fragments with `\n` gives back the
/// input minus its trailing whitespace.
/// Blank lines that fall between two full fragments become whitespace-only
/// fragments of their own. Blank input yields no fragments at all.
pub fn split(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let text = text.trim_end();

    let mut fragments = Vec::new();
    if text.trim().is_empty() {
        return fragments;
    }

    let mut current = String::new();
    let mut current_len = 0usize;
    let mut has_content = false;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if has_content {
            current_len + 1 + line_len
        } else {
            line_len
        };

        if needed <= max_len {
            if has_content {
                current.push('\n');
            }
            current.push_str(line);
            current_len = needed;
            has_content = true;
            continue;
        }

        if has_content {
            fragments.push(std::mem::take(&mut current));
            current_len = 0;
            has_content = false;
        }

        if line_len <= max_len {
            current.push_str(line);
            current_len = line_len;
            has_content = true;
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut pieces = chars.chunks(max_len).peekable();
        while let Some(piece) = pieces.next() {
            let piece: String = piece.iter().collect();
            if pieces.peek().is_some() {
                fragments.push(piece);
            } else {
                // The tail may still share a fragment with following lines
                current_len = piece.chars().count();
                current = piece;
                has_content = true;
            }
        }
    }

    if has_content {
        fragments.push(current);
    }

    fragments
}
