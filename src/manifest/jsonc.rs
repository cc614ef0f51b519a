//! Comment stripping for JSON-with-comments documents.

/// Remove `//` line comments and `/* */` block comments from `input`.
///
/// The pass tracks string literals and escapes, so comment markers inside
/// strings (`"https://example.com"`) are kept. Newlines inside comments are
/// preserved so parser diagnostics keep their line numbers.
///
/// # Examples
///
/// ```
/// use converge_cli::manifest::jsonc::strip_comments;
///
/// let src = r#"{ "url": "https://x.test" } // trailing"#;
/// assert_eq!(strip_comments(src).trim_end(), r#"{ "url": "https://x.test" }"#);
/// ```
#[must_use]
pub fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    prev = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_comments() {
        let src = "{\n  // comment\n  \"a\": 1 // trailing\n}";
        assert_eq!(strip_comments(src), "{\n  \n  \"a\": 1 \n}");
    }

    #[test]
    fn strips_block_comments_keeping_newlines() {
        let src = "{ /* one\ntwo */ \"a\": 1 }";
        assert_eq!(strip_comments(src), "{ \n \"a\": 1 }");
    }

    #[test]
    fn keeps_markers_inside_strings() {
        let src = r#"{"url": "https://example.com/*x*/", "b": "// not a comment"}"#;
        assert_eq!(strip_comments(src), src);
    }

    #[test]
    fn handles_escaped_quotes() {
        let src = r#"{"a": "say \"hi\" // still string"} // gone"#;
        assert_eq!(
            strip_comments(src),
            r#"{"a": "say \"hi\" // still string"} "#
        );
    }

    #[test]
    fn escaped_backslash_before_quote_closes_string() {
        let src = r#"{"p": "C:\\"} // gone"#;
        assert_eq!(strip_comments(src), r#"{"p": "C:\\"} "#);
    }

    #[test]
    fn unterminated_block_comment_consumes_rest() {
        assert_eq!(strip_comments("{} /* open"), "{} ");
    }
}
