//! Flat `key=value` / `key = value` line grammar (§4.4, §6), shared verbatim
//! between the per-survey properties file and the HiPS-list file format
//! (`hips_list.rs`) since both are textually the same grammar.

/// Parses one line. Blank lines and `#`-comments yield `None`.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Parses an entire properties document into an ordered list of pairs.
/// Later duplicate keys are kept in encounter order; callers that want
/// "last wins" semantics should fold over the result themselves.
pub fn parse_document(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(parse_line)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blank_lines() {
        let doc = "# a comment\n\nhips_order = 9\nhips_order_min=3\n";
        let pairs = parse_document(doc);
        assert_eq!(
            pairs,
            vec![
                ("hips_order".to_string(), "9".to_string()),
                ("hips_order_min".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn tolerates_both_equals_spacing_styles() {
        assert_eq!(parse_line("a=b"), Some(("a", "b")));
        assert_eq!(parse_line("a = b"), Some(("a", "b")));
        assert_eq!(parse_line("  a  =  b  "), Some(("a", "b")));
    }
}
