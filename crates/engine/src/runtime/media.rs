//! Strips embedded media references from final assistant text.  Media the
//! model produced travels as artifacts, never inline.

use std::sync::OnceLock;

use regex::Regex;

fn media_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)!\[[^\]]*\]\([^)]*\)|<img\b[^>]*>").ok())
        .as_ref()
}

fn blank_lines_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").ok()).as_ref()
}

/// Remove markdown images and `<img>` tags, collapsing the blank lines
/// they leave behind.
pub fn strip_media(text: &str) -> String {
    let Some(re) = media_re() else {
        return text.to_owned();
    };
    if !re.is_match(text) {
        return text.to_owned();
    }

    let stripped = re.replace_all(text, "");
    let collapsed = match blank_lines_re() {
        Some(blank) => blank.replace_all(&stripped, "\n\n").into_owned(),
        None => stripped.into_owned(),
    };
    collapsed.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_markdown_images() {
        let text = "Here is the chart:\n\n![chart](https://img.example/1.png)\n\n\nDone.";
        assert_eq!(strip_media(text), "Here is the chart:\n\nDone.");
    }

    #[test]
    fn removes_img_tags_case_insensitive() {
        assert_eq!(strip_media("a <IMG src=\"x.png\" /> b"), "a  b");
    }

    #[test]
    fn keeps_plain_links() {
        let text = "See [the docs](https://example.com).";
        assert_eq!(strip_media(text), text);
    }

    #[test]
    fn untouched_text_is_not_trimmed() {
        assert_eq!(strip_media("  plain  "), "  plain  ");
    }
}
