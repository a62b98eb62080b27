//! Unified-diff text patch application over sanitized text (C5).

use crate::error::CoreError;

/// Normalize text the way every text entry is stored: strip `\r` and, if the
/// result is non-empty, ensure it ends with exactly one trailing `\n`.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let stripped: String = text.chars().filter(|&c| c != '\r').collect();
    if stripped.is_empty() {
        return stripped;
    }
    if stripped.ends_with('\n') {
        stripped
    } else {
        let mut owned = stripped;
        owned.push('\n');
        owned
    }
}

struct Hunk {
    old_start: usize,
    old_lines: Vec<HunkLine>,
}

enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Apply a unified diff (as produced by `diff -u` / `git diff`, one file) to
/// `original`, returning the patched text.
///
/// # Errors
/// Returns [`CoreError::PatchConflict`] if a hunk's header is malformed or
/// its context/removed lines don't match `original` at the stated offset.
pub fn apply(original: &str, diff: &str) -> Result<String, CoreError> {
    let original = sanitize(original);
    let source_lines: Vec<&str> = if original.is_empty() {
        Vec::new()
    } else {
        original.lines().collect()
    };

    let hunks = parse_hunks(diff)?;

    let mut result: Vec<String> = Vec::new();
    let mut cursor = 0usize; // 0-based index into source_lines already copied

    for hunk in hunks {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor || start > source_lines.len() {
            return Err(CoreError::PatchConflict {
                reason: format!(
                    "hunk starting at old line {} is out of order or out of range",
                    hunk.old_start
                ),
            });
        }
        // Copy any untouched lines before this hunk verbatim.
        for line in &source_lines[cursor..start] {
            result.push((*line).to_owned());
        }
        cursor = start;

        for line in &hunk.old_lines {
            match line {
                HunkLine::Context(text) => {
                    let actual = source_lines.get(cursor).ok_or_else(|| {
                        CoreError::PatchConflict {
                            reason: format!(
                                "hunk expected context line {cursor} but source has only \
                                 {} lines",
                                source_lines.len()
                            ),
                        }
                    })?;
                    if actual != text {
                        return Err(CoreError::PatchConflict {
                            reason: format!(
                                "context mismatch at line {}: expected '{text}', found '{actual}'",
                                cursor + 1
                            ),
                        });
                    }
                    result.push((*actual).to_owned());
                    cursor += 1;
                }
                HunkLine::Remove(text) => {
                    let actual = source_lines.get(cursor).ok_or_else(|| {
                        CoreError::PatchConflict {
                            reason: format!(
                                "hunk expected to remove line {cursor} but source has only \
                                 {} lines",
                                source_lines.len()
                            ),
                        }
                    })?;
                    if actual != text {
                        return Err(CoreError::PatchConflict {
                            reason: format!(
                                "removed-line mismatch at line {}: expected '{text}', found \
                                 '{actual}'",
                                cursor + 1
                            ),
                        });
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => {
                    result.push(text.clone());
                }
            }
        }
    }

    for line in &source_lines[cursor..] {
        result.push((*line).to_owned());
    }

    let mut joined = result.join("\n");
    if !result.is_empty() {
        joined.push('\n');
    }
    Ok(sanitize(&joined))
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, CoreError> {
    let mut hunks = Vec::new();
    let mut lines = diff.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("@@") {
            continue;
        }
        let old_start = parse_hunk_header(line)?;
        let mut old_lines = Vec::new();

        while let Some(&next) = lines.peek() {
            if next.starts_with("@@") {
                break;
            }
            let consumed = lines.next().unwrap();
            if let Some(rest) = consumed.strip_prefix(' ') {
                old_lines.push(HunkLine::Context(rest.to_owned()));
            } else if let Some(rest) = consumed.strip_prefix('-') {
                old_lines.push(HunkLine::Remove(rest.to_owned()));
            } else if let Some(rest) = consumed.strip_prefix('+') {
                old_lines.push(HunkLine::Add(rest.to_owned()));
            } else if consumed.starts_with("\\ No newline at end of file") {
                // Ignore; sanitize() normalizes trailing-newline handling.
            } else if consumed.is_empty() {
                old_lines.push(HunkLine::Context(String::new()));
            } else {
                return Err(CoreError::PatchConflict {
                    reason: format!("unrecognized diff line: '{consumed}'"),
                });
            }
        }

        hunks.push(Hunk {
            old_start,
            old_lines,
        });
    }

    if hunks.is_empty() {
        return Err(CoreError::PatchConflict {
            reason: "diff contains no hunks".to_owned(),
        });
    }

    Ok(hunks)
}

/// Parse `@@ -l,c +l,c @@` (the `,c` counts are optional and ignored; only
/// the old-side start line matters for replay).
fn parse_hunk_header(header: &str) -> Result<usize, CoreError> {
    let reason = || CoreError::PatchConflict {
        reason: format!("malformed hunk header: '{header}'"),
    };
    let rest = header.strip_prefix("@@ -").ok_or_else(reason)?;
    let old_field = rest.split_whitespace().next().ok_or_else(reason)?;
    let old_start_str = old_field.split(',').next().ok_or_else(reason)?;
    old_start_str.parse::<usize>().map_err(|_| reason())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_cr_and_enforces_trailing_newline() {
        assert_eq!(sanitize("a\r\nb"), "a\nb\n");
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("a\n"), "a\n");
    }

    #[test]
    fn apply_inserts_a_line() {
        let original = "one\ntwo\nthree\n";
        let diff = "@@ -1,3 +1,4 @@\n one\n+one point five\n two\n three\n";
        let result = apply(original, diff).unwrap();
        assert_eq!(result, "one\none point five\ntwo\nthree\n");
    }

    #[test]
    fn apply_removes_a_line() {
        let original = "one\ntwo\nthree\n";
        let diff = "@@ -1,3 +1,2 @@\n one\n-two\n three\n";
        let result = apply(original, diff).unwrap();
        assert_eq!(result, "one\nthree\n");
    }

    #[test]
    fn apply_replaces_a_line() {
        let original = "one\ntwo\nthree\n";
        let diff = "@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three\n";
        let result = apply(original, diff).unwrap();
        assert_eq!(result, "one\nTWO\nthree\n");
    }

    #[test]
    fn apply_errors_on_context_mismatch() {
        let original = "one\ntwo\nthree\n";
        let diff = "@@ -1,3 +1,3 @@\n one\n-WRONG\n+TWO\n three\n";
        assert!(apply(original, diff).is_err());
    }

    #[test]
    fn apply_rejects_diff_with_no_hunks() {
        assert!(apply("one\n", "not a diff").is_err());
    }
}
