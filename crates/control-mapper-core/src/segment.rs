//! Language-aware segmentation of file content into evidence units.
//!
//! Each file is cut into contiguous, non-overlapping spans whose
//! concatenation reconstructs the original text byte-for-byte:
//!
//! | Kind | Boundary |
//! |------|----------|
//! | code | a definition line of the detected language (`def`, `func`, `fn`, `class`, ...) |
//! | config | the first non-blank line after a blank line |
//! | doc | a Markdown heading line (`#`) |
//! | unknown | none, the whole file is one unit |
//!
//! Lines preceding the first boundary (imports, module docs) form their own
//! unit. Offsets are byte offsets into the original text and line numbers
//! are 1-based, so evidence can be cited at its original location.
//!
//! # Example
//!
//! ```rust
//! use control_mapper_core::models::UnitKind;
//! use control_mapper_core::segment::segment;
//!
//! let text = "import os\n\ndef a():\n    pass\n\ndef b():\n    pass\n";
//! let units = segment("app.py", text, UnitKind::Code);
//! assert_eq!(units.len(), 3);
//! assert_eq!(units[1].start_line, 3);
//! let joined: String = units.iter().map(|u| u.content.as_str()).collect();
//! assert_eq!(joined, text);
//! ```

use sha2::{Digest, Sha256};

use crate::hints::{derive_flags, rule_tags, HintTable};
use crate::models::{EvidenceUnit, UnitKind};

/// Source language, used for definition boundaries and per-language hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Go,
    Rust,
    JavaScript,
    Ruby,
    Java,
    CSharp,
    CFamily,
    Other,
}

const JAVA_LIKE_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "static", "final", "abstract", "internal", "sealed",
    "partial", "override", "virtual", "async", "synchronized",
];

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "else", "do", "catch", "try", "case", "sizeof",
];

/// Lowercased extension of the final path component, without the dot.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let dot = name.rfind('.')?;
    if dot + 1 >= name.len() {
        return None;
    }
    Some(name[dot + 1..].to_lowercase())
}

/// Classify a file by extension.
pub fn detect_kind(path: &str) -> UnitKind {
    match extension(path).as_deref() {
        Some("py" | "go" | "java" | "js" | "ts" | "rb" | "cs" | "rs" | "c" | "cpp" | "h") => {
            UnitKind::Code
        }
        Some("yaml" | "yml" | "json" | "toml" | "ini" | "conf" | "properties") => UnitKind::Config,
        Some("md" | "markdown" | "rst" | "txt") => UnitKind::Doc,
        _ => UnitKind::Unknown,
    }
}

/// Detect the source language by extension.
pub fn detect_language(path: &str) -> Language {
    match extension(path).as_deref() {
        Some("py") => Language::Python,
        Some("go") => Language::Go,
        Some("rs") => Language::Rust,
        Some("js" | "ts" | "jsx" | "tsx" | "mjs") => Language::JavaScript,
        Some("rb") => Language::Ruby,
        Some("java" | "kt") => Language::Java,
        Some("cs") => Language::CSharp,
        Some("c" | "cpp" | "cc" | "h" | "hpp") => Language::CFamily,
        _ => Language::Other,
    }
}

/// Split `text` into evidence units carrying rule signals only.
pub fn segment(source_identifier: &str, text: &str, kind: UnitKind) -> Vec<EvidenceUnit> {
    segment_with_hints(source_identifier, text, kind, None)
}

/// Split `text` into evidence units, tagging each with rule signals and,
/// when a table is given, the controls whose keywords it mentions.
///
/// # Guarantees
///
/// - At least one unit is returned (an empty file yields one empty unit).
/// - Units are ordered, contiguous and non-overlapping; concatenating their
///   `content` reproduces `text` exactly.
pub fn segment_with_hints(
    source_identifier: &str,
    text: &str,
    kind: UnitKind,
    hints: Option<&HintTable>,
) -> Vec<EvidenceUnit> {
    let language = detect_language(source_identifier);
    let lines = line_spans(text);

    let mut starts: Vec<usize> = vec![0];
    let mut prev_blank = false;
    for (i, &(_, line)) in lines.iter().enumerate() {
        let blank = line.trim().is_empty();
        if i > 0 {
            let boundary = match kind {
                UnitKind::Code => is_definition(line, language),
                UnitKind::Config => prev_blank && !blank,
                UnitKind::Doc => line.starts_with('#'),
                UnitKind::Unknown => false,
            };
            if boundary {
                starts.push(i);
            }
        }
        prev_blank = blank;
    }

    if lines.is_empty() {
        return vec![make_unit(source_identifier, text, 0, 0, 1, 1, kind, language, hints)];
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &first) in starts.iter().enumerate() {
        let last = starts.get(n + 1).map(|next| next - 1).unwrap_or(lines.len() - 1);
        let start_offset = lines[first].0;
        let end_offset = starts
            .get(n + 1)
            .map(|&next| lines[next].0)
            .unwrap_or(text.len());
        units.push(make_unit(
            source_identifier,
            text,
            start_offset,
            end_offset,
            first + 1,
            last + 1,
            kind,
            language,
            hints,
        ));
    }
    units
}

/// `(byte offset, line including terminator)` for every line of `text`.
fn line_spans(text: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        spans.push((offset, line));
        offset += line.len();
    }
    spans
}

fn strip_modifiers<'a>(mut line: &'a str, modifiers: &[&str]) -> &'a str {
    loop {
        let mut stripped = false;
        for m in modifiers {
            if let Some(rest) = line.strip_prefix(m) {
                if rest.starts_with(' ') || rest.starts_with('(') {
                    // `pub(crate) fn` keeps the restriction attached to the keyword.
                    let rest = if rest.starts_with('(') {
                        rest.find(')').map(|i| &rest[i + 1..]).unwrap_or(rest)
                    } else {
                        rest
                    };
                    line = rest.trim_start();
                    stripped = true;
                }
            }
        }
        if !stripped {
            return line;
        }
    }
}

fn starts_with_any(line: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| line.starts_with(p))
}

fn is_definition(line: &str, language: Language) -> bool {
    let trimmed = line.trim_start();
    match language {
        Language::Python => starts_with_any(trimmed, &["def ", "class ", "async def "]),
        Language::Go => starts_with_any(trimmed, &["func ", "type "]),
        Language::Ruby => starts_with_any(trimmed, &["def ", "class ", "module "]),
        Language::Rust => {
            let rest = strip_modifiers(trimmed, &["pub", "async", "unsafe", "const", "extern"]);
            starts_with_any(
                rest,
                &["fn ", "impl ", "impl<", "struct ", "enum ", "trait ", "mod "],
            )
        }
        Language::JavaScript => {
            let rest = strip_modifiers(trimmed, &["export", "default", "async", "abstract"]);
            starts_with_any(rest, &["function ", "function*", "class ", "interface "])
        }
        Language::Java | Language::CSharp => {
            let rest = strip_modifiers(trimmed, JAVA_LIKE_MODIFIERS);
            if starts_with_any(rest, &["class ", "interface ", "enum ", "record ", "struct "]) {
                return true;
            }
            rest.len() < trimmed.len() && rest.contains('(') && !trimmed.trim_end().ends_with(';')
        }
        Language::CFamily => {
            if line.starts_with(char::is_whitespace) || trimmed.is_empty() {
                return false;
            }
            if starts_with_any(trimmed, &["#", "//", "/*", "*", "}"]) {
                return false;
            }
            let first_word = trimmed
                .split(|c: char| !c.is_alphanumeric() && c != '_')
                .next()
                .unwrap_or("");
            if CONTROL_KEYWORDS.contains(&first_word) {
                return false;
            }
            starts_with_any(trimmed, &["class ", "struct ", "namespace "])
                || (trimmed.contains('(') && !trimmed.trim_end().ends_with(';'))
        }
        Language::Other => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn make_unit(
    source_identifier: &str,
    text: &str,
    start_offset: usize,
    end_offset: usize,
    start_line: usize,
    end_line: usize,
    kind: UnitKind,
    language: Language,
    hints: Option<&HintTable>,
) -> EvidenceUnit {
    let content = &text[start_offset..end_offset];
    let derived_flags = derive_flags(content);
    let mut hint_tags = rule_tags(&derived_flags);
    if let Some(table) = hints {
        hint_tags.extend(table.tags_for(content, language));
    }

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    EvidenceUnit {
        content: content.to_string(),
        source_identifier: source_identifier.to_string(),
        start_offset,
        end_offset,
        start_line,
        end_line,
        unit_kind: kind,
        derived_flags,
        hint_tags,
        content_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn joined(units: &[EvidenceUnit]) -> String {
        units.iter().map(|u| u.content.as_str()).collect()
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind("src/auth.py"), UnitKind::Code);
        assert_eq!(detect_kind("deploy/values.YAML"), UnitKind::Config);
        assert_eq!(detect_kind("README.md"), UnitKind::Doc);
        assert_eq!(detect_kind("Makefile"), UnitKind::Unknown);
        assert_eq!(detect_kind("archive.tar.gz"), UnitKind::Unknown);
        assert_eq!(detect_kind("dir.d/noext"), UnitKind::Unknown);
    }

    #[test]
    fn test_unknown_kind_is_single_unit() {
        let text = "line one\n\nline two\n# not a heading here\n";
        let units = segment("Makefile", text, UnitKind::Unknown);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].content, text);
        assert_eq!(units[0].start_line, 1);
        assert_eq!(units[0].end_line, 4);
    }

    #[test]
    fn test_empty_file_yields_one_empty_unit() {
        let units = segment("empty.py", "", UnitKind::Code);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].content, "");
        assert_eq!(units[0].start_offset, 0);
        assert_eq!(units[0].end_offset, 0);
    }

    #[test]
    fn test_python_definitions() {
        let text = "import jwt\n\nclass Auth:\n    def check(self, jwt_token):\n        return True\n\ndef login():\n    pass";
        let units = segment("auth.py", text, UnitKind::Code);
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].content, "import jwt\n\n");
        assert_eq!((units[1].start_line, units[1].end_line), (3, 3));
        assert_eq!((units[2].start_line, units[2].end_line), (4, 6));
        assert_eq!((units[3].start_line, units[3].end_line), (7, 8));
        assert!(units[2].content.contains("jwt_token"));
        assert_eq!(joined(&units), text);
    }

    #[test]
    fn test_go_and_rust_definitions() {
        let go = "package main\n\nfunc a() {}\n\ntype T struct{}\n";
        assert_eq!(segment("main.go", go, UnitKind::Code).len(), 3);

        let rs = "use std::io;\n\npub(crate) fn a() {}\n\nimpl<T> X<T> {}\npub async fn b() {}\n";
        let units = segment("lib.rs", rs, UnitKind::Code);
        assert_eq!(units.len(), 4);
        assert_eq!(joined(&units), rs);
    }

    #[test]
    fn test_javascript_exports() {
        let js = "const x = 1;\nexport default function handler() {}\nexport class A {}\n";
        assert_eq!(segment("a.js", js, UnitKind::Code).len(), 3);
    }

    #[test]
    fn test_c_family_skips_control_flow() {
        let c = "#include <ssl.h>\nint main(void) {\n    if (x) {\n    }\n}\nstatic void f(int a) {\n}\n";
        let units = segment("main.c", c, UnitKind::Code);
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].start_line, 2);
        assert_eq!(units[2].start_line, 6);
    }

    #[test]
    fn test_config_blocks() {
        let text = "server:\n  port: 443\n\n\ntls:\n  enabled: true\n";
        let units = segment("values.yaml", text, UnitKind::Config);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].content, "server:\n  port: 443\n\n\n");
        assert_eq!(units[1].start_line, 5);
        assert!(units[1].derived_flags.uses_tls);
        assert!(units[1].hint_tags.contains("SC-12"));
    }

    #[test]
    fn test_doc_headings() {
        let text = "intro\n# One\nbody\n## Two\nmore\n";
        let units = segment("README.md", text, UnitKind::Doc);
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].content, "# One\nbody\n");
        assert_eq!(units[2].end_line, 5);
    }

    #[test]
    fn test_offsets_index_original_text() {
        let text = "def a():\n    pass\ndef b():\n    pass\n";
        for unit in segment("x.py", text, UnitKind::Code) {
            assert_eq!(&text[unit.start_offset..unit.end_offset], unit.content);
        }
    }

    #[test]
    fn test_hints_attached() {
        let table = HintTable::from_toml_str("[controls.ac10]\ngeneric = [\"max_sessions\"]\n").unwrap();
        let units = segment_with_hints(
            "settings.py",
            "MAX_SESSIONS = 3\n",
            UnitKind::Code,
            Some(&table),
        );
        assert!(units[0].hint_tags.contains("AC-10"));
    }

    #[test]
    fn test_content_hash_deterministic() {
        let a = segment("a.md", "# T\nbody", UnitKind::Doc);
        let b = segment("b.md", "# T\nbody", UnitKind::Doc);
        assert_eq!(a[0].content_hash, b[0].content_hash);
        assert_eq!(a[0].content_hash.len(), 64);
    }

    fn line_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("def f():".to_string()),
            Just("class A:".to_string()),
            Just("func main() {".to_string()),
            Just("# Heading".to_string()),
            Just("".to_string()),
            Just("   ".to_string()),
            Just("key: value".to_string()),
            "[a-z é{}();]{0,12}",
        ]
    }

    proptest! {
        #[test]
        fn prop_units_reconstruct_file(
            lines in prop::collection::vec(line_strategy(), 0..40),
            trailing_newline in any::<bool>(),
            kind in prop_oneof![
                Just(UnitKind::Code),
                Just(UnitKind::Config),
                Just(UnitKind::Doc),
                Just(UnitKind::Unknown),
            ],
            path in prop_oneof![Just("a.py"), Just("b.go"), Just("c.c"), Just("d.yaml"), Just("e.md")],
        ) {
            let mut text = lines.join("\n");
            if trailing_newline {
                text.push('\n');
            }
            let units = segment(path, &text, kind);
            prop_assert!(!units.is_empty());
            prop_assert_eq!(joined(&units), text.clone());

            let mut expected_offset = 0;
            for unit in &units {
                prop_assert_eq!(unit.start_offset, expected_offset);
                prop_assert!(unit.start_line <= unit.end_line);
                expected_offset = unit.end_offset;
            }
            prop_assert_eq!(expected_offset, text.len());
        }
    }
}
