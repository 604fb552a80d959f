//! Paragraph-boundary chunking of file text.
//!
//! Each chunk starts with a header line naming its source file:
//! `FILE: <path>` for the first chunk and `FILE: <path> (continued)` for the
//! rest. The remote search layer relies on this exact header text.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::Chunk;

/// Default upper bound on chunk length, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;

const SECTION_SEPARATOR: &str = "\n\n";

fn section_boundary() -> &'static Regex {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    BOUNDARY.get_or_init(|| Regex::new(r"\n{2,}").expect("section boundary regex is valid"))
}

/// Header line for the first chunk of a file.
pub fn header(path: &str) -> String {
    format!("FILE: {}", path)
}

/// Header line for every chunk after the first.
pub fn continued_header(path: &str) -> String {
    format!("FILE: {} (continued)", path)
}

/// Accumulates sections behind a header line.
struct ChunkBuffer {
    text: String,
    chars: usize,
    has_body: bool,
}

impl ChunkBuffer {
    fn new(header: String) -> Self {
        let mut text = header;
        text.push_str(SECTION_SEPARATOR);
        let chars = text.chars().count();
        Self {
            text,
            chars,
            has_body: false,
        }
    }

    fn push_section(&mut self, section: &str, section_chars: usize) {
        self.text.push_str(section);
        self.text.push_str(SECTION_SEPARATOR);
        self.chars += section_chars + SECTION_SEPARATOR.len();
        self.has_body = true;
    }

    fn into_chunk(self, path: &str) -> Chunk {
        Chunk {
            text: self.text.trim().to_string(),
            source_path: path.to_string(),
        }
    }
}

/// Split `content` into header-prefixed chunks of at most `max_chars` characters.
///
/// Sections (text between runs of two or more newlines) are never split; a
/// single section larger than the bound becomes its own oversized chunk.
/// Empty or whitespace-only content yields no chunks.
pub fn chunk_file(path: &str, content: &str, max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer = ChunkBuffer::new(header(path));

    for section in section_boundary().split(content) {
        if section.trim().is_empty() {
            continue;
        }

        let section_chars = section.chars().count();
        if buffer.has_body && buffer.chars + section_chars > max_chars {
            let full = std::mem::replace(&mut buffer, ChunkBuffer::new(continued_header(path)));
            chunks.push(full.into_chunk(path));
        }

        buffer.push_section(section, section_chars);
    }

    if buffer.has_body {
        chunks.push(buffer.into_chunk(path));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strip the header line and split the body back into sections.
    fn body_sections(chunk: &Chunk) -> Vec<String> {
        let (_, body) = chunk.text.split_once(SECTION_SEPARATOR).unwrap();
        body.split(SECTION_SEPARATOR).map(str::to_string).collect()
    }

    #[test]
    fn test_empty_and_whitespace_yield_no_chunks() {
        assert!(chunk_file("a.rs", "", 2000).is_empty());
        assert!(chunk_file("a.rs", "   \n\n\t\n\n\n  ", 2000).is_empty());
    }

    #[test]
    fn test_small_file_single_chunk_with_header() {
        let chunks = chunk_file("src/main.rs", "fn main() {}\n", 2000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "FILE: src/main.rs\n\nfn main() {}");
        assert_eq!(chunks[0].source_path, "src/main.rs");
    }

    #[test]
    fn test_continuation_headers() {
        let section = "x".repeat(60);
        let content = vec![section.as_str(); 4].join("\n\n");
        let chunks = chunk_file("lib.rs", &content, 100);

        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].text.starts_with("FILE: lib.rs\n\n"));
        for chunk in &chunks[1..] {
            assert!(chunk.text.starts_with("FILE: lib.rs (continued)\n\n"));
        }
    }

    #[test]
    fn test_oversized_first_section_still_emitted() {
        let big = "y".repeat(5000);
        let chunks = chunk_file("big.txt", &big, 100);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.ends_with(&big));
    }

    #[test]
    fn test_sections_reassemble_in_order() {
        let sections: Vec<String> = (0..30)
            .map(|i| format!("section {} {}", i, "z".repeat(i * 7)))
            .collect();
        let content = sections.join("\n\n\n");
        let chunks = chunk_file("doc.md", &content, 300);

        assert!(chunks.len() > 1);
        let rebuilt: Vec<String> = chunks.iter().flat_map(body_sections).collect();
        assert_eq!(rebuilt, sections);
    }

    #[test]
    fn test_bound_respected_when_sections_fit() {
        let content = (0..50).map(|_| "abcdefghij").collect::<Vec<_>>().join("\n\n");
        for chunk in chunk_file("f.txt", &content, 120) {
            assert!(chunk.text.chars().count() <= 120, "{}", chunk.text);
        }
    }

    #[test]
    fn test_no_trailing_header_only_chunk() {
        let content = format!("{}\n\n   \n\n", "a".repeat(50));
        let chunks = chunk_file("f.txt", &content, 40);
        assert_eq!(chunks.len(), 1);
        assert!(chunks.iter().all(|c| c.text.trim() != "FILE: f.txt (continued)"));
    }
}
