//! Frame tokenizing and encoding

use std::time::Duration;

use crate::error::ProtocolError;

/// Common capability of every wire message
pub trait Message {
    /// Keyword written as token 0
    fn keyword(&self) -> &'static str;

    /// Positional arguments following the keyword
    fn args(&self) -> Vec<String>;

    /// Encode the frame without its trailing newline
    fn to_bytes(&self) -> Vec<u8> {
        to_bytes(self.keyword(), &self.args())
    }
}

/// Split a frame into its keyword and arguments
pub fn parse_frame(line: &str) -> Result<(&str, Vec<&str>), ProtocolError> {
    let mut parts = line.split(' ');
    let keyword = match parts.next() {
        Some(keyword) if !keyword.is_empty() => keyword,
        _ => return Err(ProtocolError::EmptyFrame),
    };
    Ok((keyword, parts.collect()))
}

/// Join a keyword and its arguments into a frame
pub fn to_bytes(keyword: &str, args: &[String]) -> Vec<u8> {
    let mut out = String::from(keyword);
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out.into_bytes()
}

/// Render a duration as integer milliseconds
pub fn duration_to_string(duration: Duration) -> String {
    duration.as_millis().to_string()
}

/// Parse integer milliseconds into a duration
pub fn string_to_duration(src: &str) -> Result<Duration, ProtocolError> {
    src.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ProtocolError::InvalidDuration(src.to_string()))
}

/// Check a decoded argument list has exactly `expected` entries
pub(crate) fn expect_args(
    keyword: &'static str,
    args: &[&str],
    expected: usize,
) -> Result<(), ProtocolError> {
    if args.len() != expected {
        return Err(ProtocolError::ArgumentCount {
            keyword,
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_frame() {
        let (keyword, args) = parse_frame("ON mylock 5000 n1").unwrap();
        assert_eq!(keyword, "ON");
        assert_eq!(args, vec!["mylock", "5000", "n1"]);
    }

    #[test]
    fn test_parse_frame_without_args() {
        let (keyword, args) = parse_frame("STATS").unwrap();
        assert_eq!(keyword, "STATS");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_empty_frame() {
        assert_eq!(parse_frame(""), Err(ProtocolError::EmptyFrame));
        assert_eq!(parse_frame(" ON"), Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_to_bytes() {
        let args = vec!["mylock".to_string(), "n1".to_string()];
        assert_eq!(to_bytes("OFF", &args), b"OFF mylock n1".to_vec());
        assert_eq!(to_bytes("STATS", &[]), b"STATS".to_vec());
    }

    #[test]
    fn test_durations() {
        assert_eq!(duration_to_string(Duration::from_secs(5)), "5000");
        assert_eq!(duration_to_string(Duration::from_micros(1500)), "1");
        assert_eq!(string_to_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(
            string_to_duration("-1"),
            Err(ProtocolError::InvalidDuration("-1".to_string()))
        );
        assert!(string_to_duration("soon").is_err());
    }

    proptest! {
        #[test]
        fn prop_frame_tokens_survive(
            keyword in "[A-Z]{1,8}",
            args in proptest::collection::vec("[a-zA-Z0-9:._-]{1,12}", 0..5),
        ) {
            let bytes = to_bytes(&keyword, &args);
            let line = String::from_utf8(bytes).unwrap();
            let (parsed_keyword, parsed_args) = parse_frame(&line).unwrap();
            prop_assert_eq!(parsed_keyword, keyword.as_str());
            prop_assert_eq!(parsed_args, args.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
