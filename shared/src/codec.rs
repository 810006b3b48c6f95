//! Field splitting and packet building for the `:`-separated line format.

pub const LINE_TERMINATOR: &str = "\r\n";
pub const FIELD_SEPARATOR: char = ':';

/// Builds `<tag><field0>:<field1>:...\r\n` with a single allocation.
pub fn build_packet(tag: &str, fields: &[&str]) -> String {
    let separators = fields.len().saturating_sub(1);
    let len = tag.len()
        + fields.iter().map(|f| f.len()).sum::<usize>()
        + separators
        + LINE_TERMINATOR.len();

    let mut line = String::with_capacity(len);
    line.push_str(tag);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(FIELD_SEPARATOR);
        }
        line.push_str(field);
    }
    line.push_str(LINE_TERMINATOR);
    line
}

/// Same as [`build_packet`] for owned fields.
pub fn build_packet_owned(tag: &str, fields: &[String]) -> String {
    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    build_packet(tag, &refs)
}

/// Strips a trailing `\r\n` (or lone `\n`) from a line.
pub fn trim_terminator(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

/// Splits the body of a packet (everything after the tag) into fields.
///
/// With `max_fields`, the last field keeps any embedded separators, which is
/// how free text such as `#TM` messages survives the split.
pub fn split_fields(body: &str, max_fields: Option<usize>) -> Vec<&str> {
    match max_fields {
        Some(max) if max > 0 => body.splitn(max, FIELD_SEPARATOR).collect(),
        _ => body.split(FIELD_SEPARATOR).collect(),
    }
}

/// Appends the line terminator when missing.
pub fn ensure_terminated(line: &str) -> std::borrow::Cow<'_, str> {
    if line.ends_with(LINE_TERMINATOR) {
        std::borrow::Cow::Borrowed(line)
    } else {
        let mut owned = String::with_capacity(line.len() + LINE_TERMINATOR.len());
        owned.push_str(trim_terminator(line));
        owned.push_str(LINE_TERMINATOR);
        std::borrow::Cow::Owned(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_packet() {
        let line = build_packet("#TM", &["SERVER", "CES2352", "Welcome"]);
        assert_eq!(line, "#TMSERVER:CES2352:Welcome\r\n");
        assert_eq!(line.capacity(), line.len());
    }

    #[test]
    fn test_build_packet_empty_fields() {
        assert_eq!(build_packet("#DA", &["ZSHA_CTR"]), "#DAZSHA_CTR\r\n");
        assert_eq!(build_packet("$PI", &[]), "$PI\r\n");
        assert_eq!(build_packet("#AA", &["A", "", "C"]), "#AAA::C\r\n");
    }

    #[test]
    fn test_split_keeps_colons_in_last_field() {
        let fields = split_fields("CES2352:ZSHA_CTR:hello: how are you", Some(3));
        assert_eq!(fields, vec!["CES2352", "ZSHA_CTR", "hello: how are you"]);

        let fields = split_fields("a:b:c:d", None);
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn test_terminators() {
        assert_eq!(trim_terminator("abc\r\n"), "abc");
        assert_eq!(trim_terminator("abc\n"), "abc");
        assert_eq!(trim_terminator("abc"), "abc");
        assert_eq!(ensure_terminated("abc"), "abc\r\n");
        assert_eq!(ensure_terminated("abc\n"), "abc\r\n");
        assert!(matches!(
            ensure_terminated("abc\r\n"),
            std::borrow::Cow::Borrowed(_)
        ));
    }
}
