/// Normalizes a link or footnote label for side-table lookup: surrounding
/// whitespace is trimmed, interior whitespace runs collapse to a single
/// space, and the result is Unicode-lowercased. `U+1E9E` (capital sharp s)
/// maps to `ss` before lowercasing, so it matches neither `ß` nor `SS`
/// spelled with a capital eszett only.
pub(crate) fn normalize_label(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut last_space = false;
    for ch in raw.chars() {
        if ch == ' ' || ch == '\t' || ch == '\r' || ch == '\n' {
            if !collapsed.is_empty() && !last_space {
                collapsed.push(' ');
                last_space = true;
            }
            continue;
        }
        last_space = false;
        if ch == '\u{1E9E}' {
            collapsed.push_str("ss");
        } else {
            collapsed.push(ch);
        }
    }
    if collapsed.ends_with(' ') {
        collapsed.pop();
    }
    collapsed.to_lowercase()
}

/// Escapes recognized inside a footnote label: `\[`, `\]`, `\\`.
pub(crate) fn is_label_escape(byte: u8) -> bool {
    byte == b'[' || byte == b']' || byte == b'\\'
}

#[cfg(test)]
mod tests {
    use super::normalize_label;

    #[test]
    fn collapses_and_folds() {
        assert_eq!(normalize_label("  Foo\t\n Bar  "), "foo bar");
    }

    #[test]
    fn capital_eszett_folds_to_ss() {
        assert_eq!(normalize_label("ẞ"), "ss");
        assert_eq!(normalize_label("ß"), "ß");
    }
}
