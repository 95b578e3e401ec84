//! Room/player name normalization (spec.md §6.3, SPEC_FULL.md §4.7).

use super::types::MAX_NAME_LENGTH;

/// Collapses interior whitespace runs to a single space, trims leading and
/// trailing whitespace, and rejects control characters, all-whitespace
/// input, and results over [`MAX_NAME_LENGTH`] bytes (SPEC_FULL.md §4.7,
/// grounded on `original_source/server/vsx-normalize-name.c`, whose final
/// length check fails the command outright rather than clipping it).
///
/// Operates byte-wise: every byte this function treats specially (space,
/// the other ASCII whitespace forms, and control bytes below `' '`) is
/// single-byte ASCII, so UTF-8 continuation bytes always fall through to
/// the "keep as-is" branch untouched.
#[must_use]
pub fn normalize_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut got_letter = false;

    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            out.push(b' ');
            while i + 1 < bytes.len() && bytes[i + 1].is_ascii_whitespace() {
                i += 1;
            }
        } else if b <= b' ' {
            return None;
        } else {
            out.push(b);
            got_letter = true;
        }
        i += 1;
    }

    if !got_letter {
        return None;
    }

    if out.last() == Some(&b' ') {
        out.pop();
    }

    // Safe: every byte pushed was either copied verbatim from the
    // UTF-8-valid input or is the ASCII space we inserted ourselves.
    let collapsed = String::from_utf8(out).expect("normalize_name preserves UTF-8 validity");
    if collapsed.len() > MAX_NAME_LENGTH {
        return None;
    }
    Some(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(normalize_name("  gustavo   g\t\tomez "), Some("gustavo g omez".to_string()));
    }

    #[test]
    fn rejects_control_characters() {
        assert_eq!(normalize_name("bad\x01name"), None);
    }

    #[test]
    fn rejects_all_whitespace() {
        assert_eq!(normalize_name("   \t  "), None);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(normalize_name(""), None);
    }

    #[test]
    fn rejects_over_length_names() {
        let long = "a".repeat(MAX_NAME_LENGTH + 10);
        assert_eq!(normalize_name(&long), None);
    }

    #[test]
    fn rejects_over_length_multibyte_names() {
        let long = format!("{}{}", "ĉ".repeat(MAX_NAME_LENGTH / 2), "x");
        assert_eq!(normalize_name(&long), None);
    }

    #[test]
    fn preserves_multibyte_utf8() {
        assert_eq!(normalize_name("  Esperanto ĉ ĝ ĵ  "), Some("Esperanto ĉ ĝ ĵ".to_string()));
    }

    #[test]
    fn accepts_exactly_max_length() {
        let exact = "a".repeat(MAX_NAME_LENGTH);
        assert_eq!(normalize_name(&exact), Some(exact));
    }
}
