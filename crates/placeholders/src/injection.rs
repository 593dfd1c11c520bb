//! Delimited sections for content inlined by directives.

use pv_domain::capability::Chunk;

/// Format knowledge search results as one delimited block per chunk.
pub fn format_knowledge_section(query: &str, chunks: &[Chunk]) -> String {
    let mut out = format!(
        "\
=== KNOWLEDGE ===
QUERY: {query}
RESULTS: {}
",
        chunks.len()
    );
    if chunks.is_empty() {
        out.push_str("[NO MATCHING KNOWLEDGE]\n");
    }
    for chunk in chunks {
        out.push_str(&format!(
            "\
--- BEGIN: {} ---
{}
--- END ---
",
            chunk.source_label, chunk.content
        ));
    }
    out.push_str("=== END_KNOWLEDGE ===\n");
    out
}

/// Format an inlined file (or its transcript).
pub fn format_file_section(label: &str, content: &str, raw_chars: usize, truncated: bool) -> String {
    format!(
        "\