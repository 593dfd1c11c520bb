RAW_CHARS: {raw_chars}
TRUNCATED: {truncated}
--- BEGIN ---
{content}
--- END ---
"
    )
}

/// Format the markdown rendition of a web page.
pub fn format_url_section(url: &str, content: &str, raw_chars: usize, truncated: bool) -> String {
    format!(
        "\
=== URL: {url} ===
RAW_CHARS: {raw_chars}
TRUNCATED: {truncated}
--- BEGIN ---
{content}
--- END ---
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(label: &str, content: &str) -> Chunk {
        Chunk {
            id: "c".into(),
            source_id: "s".into(),
            source_label: label.into(),
            content: content.into(),
            score: 0.9,
            url: None,
        }
    }

    #[test]
    fn knowledge_section_lists_chunks() {
        let out = format_knowledge_section("tides", &[chunk("Almanac", "High at noon")]);
        assert!(out.starts_with("=== KNOWLEDGE ===\nQUERY: tides\nRESULTS: 1\n"));
        assert!(out.contains("--- BEGIN: Almanac ---\nHigh at noon\n--- END ---"));
        assert!(out.ends_with("=== END_KNOWLEDGE ===\n"));
    }

    #[test]
    fn knowledge_section_marks_empty_results() {
        let out = format_knowledge_section("nothing", &[]);
        assert!(out.contains("[NO MATCHING KNOWLEDGE]"));
    }

    #[test]
    fn file_section_has_delimiters() {
        let out = format_file_section("notes.txt", "body", 4, false);
        assert!(out.contains("=== FILE: notes.txt ==="));
        assert!(out.contains("--- BEGIN ---\nbody\n--- END ---"));
    }
}
