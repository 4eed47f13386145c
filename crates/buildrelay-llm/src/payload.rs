//! Extraction of the file map from raw model output.
//!
//! Models are asked for a single JSON object mapping paths to contents. When
//! they wrap it in prose or fall back to fenced code blocks, the fenced blocks
//! are mapped to conventional file names instead.

use buildrelay_utils::types::FileSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::types::ProviderFailure;

static FENCED_BLOCK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").ok());

/// Parse model output into a non-empty file set.
///
/// # Errors
///
/// Returns a `MalformedOutput` failure when no usable file can be extracted.
pub fn parse_code_payload(text: &str) -> Result<FileSet, ProviderFailure> {
    let mut files = extract_json_object(text).unwrap_or_default();
    if files.is_empty() {
        files = extract_fenced_blocks(text);
    }

    let files = sanitize_paths(files);
    if files.is_empty() {
        return Err(ProviderFailure::malformed(format!(
            "no files could be extracted from {} characters of output",
            text.len()
        )));
    }
    Ok(files)
}

/// The span from the first `{` to the last `}`, parsed as a JSON object.
fn extract_json_object(text: &str) -> Option<FileSet> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]).ok()? {
        Value::Object(map) => Some(object_to_files(map)),
        _ => None,
    }
}

fn object_to_files(map: serde_json::Map<String, Value>) -> FileSet {
    map.into_iter()
        .filter_map(|(path, value)| match value {
            Value::String(s) => Some((path, s.into_bytes())),
            Value::Null => None,
            // e.g. a package.json emitted as a nested object
            other => serde_json::to_vec_pretty(&other).ok().map(|v| (path, v)),
        })
        .collect()
}

fn extract_fenced_blocks(text: &str) -> FileSet {
    let mut files = FileSet::new();
    let Some(regex) = FENCED_BLOCK.as_ref() else {
        return files;
    };
    for caps in regex.captures_iter(text) {
        let lang = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        let code = caps.get(2).map_or("", |m| m.as_str());
        match lang.as_str() {
            "html" => {
                files.insert("index.html".to_string(), code.as_bytes().to_vec());
            }
            "js" | "javascript" => {
                files.insert("script.js".to_string(), code.as_bytes().to_vec());
            }
            "css" => {
                files.insert("style.css".to_string(), code.as_bytes().to_vec());
            }
            "json" => {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(code) {
                    files.extend(object_to_files(map));
                }
            }
            _ => {}
        }
    }
    files
}

/// Normalize paths and drop any that are empty or escape the repository root.
fn sanitize_paths(files: FileSet) -> FileSet {
    files
        .into_iter()
        .filter_map(|(path, content)| {
            let trimmed = path.trim().trim_start_matches("./").to_string();
            let escapes = trimmed.starts_with('/')
                || trimmed.contains('\\')
                || trimmed.split('/').any(|seg| seg == ".." || seg.is_empty());
            if trimmed.is_empty() || escapes || trimmed.starts_with(".git/") {
                warn!(path = %path, "Dropping unusable path from model output");
                None
            } else {
                Some((trimmed, content))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    #[test]
    fn parses_a_bare_json_object() {
        let files =
            parse_code_payload(r#"{"index.html": "<html></html>", "style.css": "body{}"}"#).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["index.html"], b"<html></html>");
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let text = "Here you go:\n```json\n{\"index.html\": \"<p>hi</p>\"}\n```\nEnjoy!";
        let files = parse_code_payload(text).unwrap();
        assert_eq!(files["index.html"], b"<p>hi</p>");
    }

    #[test]
    fn nested_objects_become_json_files() {
        let files = parse_code_payload(r#"{"package.json": {"name": "app"}}"#).unwrap();
        let parsed: Value = serde_json::from_slice(&files["package.json"]).unwrap();
        assert_eq!(parsed["name"], "app");
    }

    #[test]
    fn falls_back_to_fenced_blocks() {
        let text = "```html\n<h1>x</h1>\n```\n\n```javascript\nrun();\n```\n```css\nh1{}\n```";
        let files = parse_code_payload(text).unwrap();
        assert_eq!(files["index.html"], b"<h1>x</h1>\n");
        assert_eq!(files["script.js"], b"run();\n");
        assert_eq!(files["style.css"], b"h1{}\n");
    }

    #[test]
    fn unsafe_and_empty_paths_are_dropped() {
        let files = parse_code_payload(
            r#"{"../etc/passwd": "x", "/abs": "y", "": "z", "./app.js": "ok", ".git/config": "no"}"#,
        )
        .unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["app.js"]);
    }

    #[test]
    fn empty_or_unparsable_output_is_malformed() {
        for text in ["", "I cannot help with that.", "{}", r#"{"": "x"}"#] {
            let err = parse_code_payload(text).unwrap_err();
            assert_eq!(err.kind, FailureKind::MalformedOutput, "input: {text:?}");
        }
    }
}
