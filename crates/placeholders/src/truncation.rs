/// Cap inlined content at `max_chars` bytes.
///
/// The cut lands on a UTF-8 boundary and is marked with `\n\n[TRUNCATED]\n`.
pub fn truncate_inline(content: &str, max_chars: usize) -> (String, bool) {
    if content.len() <= max_chars {
        return (content.to_string(), false);
    }
    let boundary = floor_boundary(content, max_chars);
    let mut result = content[..boundary].to_string();
    result.push_str("\n\n[TRUNCATED]\n");
    (result, true)
}

/// Largest char boundary not above `index`.
pub fn floor_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
