pub(super) fn join_inline(left: &str, right: &str) -> String {
    if left.trim().is_empty() {
        return right.trim_start().to_string();
    }
    if needs_space(left, right) {
        format!("{} {}", left.trim_end(), right.trim_start())
    } else {
        format!("{}{}", left.trim_end(), right.trim_start())
    }
}

pub(super) fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => {
            if is_full_width(a) || is_full_width(b) {
                return false;
            }
            (a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric())
                || (a.is_alphabetic() && b.is_alphabetic())
                || (matches!(a, ',' | '.' | ';' | ':' | '!' | '?') && b.is_alphanumeric())
        }
        _ => false,
    }
}

fn is_full_width(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3000..=0x30FF | 0x31F0..=0x31FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xFF01..=0xFF60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_lines_are_joined_with_a_space() {
        assert_eq!(join_inline("The quick", "brown fox"), "The quick brown fox");
        assert_eq!(join_inline("ends here.", "Next"), "ends here. Next");
    }

    #[test]
    fn japanese_lines_are_joined_directly() {
        assert_eq!(join_inline("これは", "テストです"), "これはテストです");
        assert_eq!(join_inline("見出し", "Title"), "見出しTitle");
    }

    #[test]
    fn empty_left_side_keeps_right() {
        assert_eq!(join_inline("", "  Task"), "Task");
    }
}
