// Static member lookup
// Peers come from a comma separated `host:port` list in configuration

use std::collections::HashSet;

use tracing::warn;

/// Split a member list into distinct, trimmed `host:port` entries
///
/// Order of first appearance is kept. Entries without a port are skipped.
///
/// ```
/// use relaylock_core::parse_member_list;
///
/// let members = parse_member_list(" 10.0.0.1:20000, 10.0.0.2:20000,,10.0.0.1:20000");
/// assert_eq!(members, vec!["10.0.0.1:20000", "10.0.0.2:20000"]);
/// ```
pub fn parse_member_list(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut members = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if !is_host_port(entry) {
            warn!(member = %entry, "Ignoring member without host:port");
            continue;
        }
        if seen.insert(entry.to_string()) {
            members.push(entry.to_string());
        }
    }

    members
}

fn is_host_port(entry: &str) -> bool {
    match entry.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_list() {
        assert_eq!(
            parse_member_list("127.0.0.1:20000,127.0.0.1:20001"),
            vec!["127.0.0.1:20000", "127.0.0.1:20001"]
        );
        assert!(parse_member_list("").is_empty());
        assert!(parse_member_list(" , ").is_empty());
    }

    #[test]
    fn test_parse_member_list_skips_invalid() {
        assert_eq!(
            parse_member_list("localhost,:20000,host:notaport,node-2:20000"),
            vec!["node-2:20000"]
        );
    }
}
