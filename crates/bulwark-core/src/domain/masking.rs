//! PII masking for audit payloads.

use std::net::IpAddr;

const REDACTED: &str = "***";

/// Truncates an IP address to a coarse prefix.
///
/// IPv4 keeps the first two octets, IPv6 the first two hextets. Anything that
/// does not parse as an address is fully redacted.
pub fn mask_ip(ip: &str) -> String {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, _, _] = v4.octets();
            format!("{a}.{b}.x.x")
        }
        Ok(IpAddr::V6(v6)) => {
            let segments = v6.segments();
            format!("{:x}:{:x}:x:x:x:x:x:x", segments[0], segments[1])
        }
        Err(_) => REDACTED.to_string(),
    }
}

/// Keeps the first and last character of both the local and domain part.
pub fn mask_email(email: &str) -> String {
    match email.trim().rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            format!("{}@{}", mask_segment(local), mask_segment(domain))
        }
        _ => REDACTED.to_string(),
    }
}

/// Masks a rate-limit key that may itself be an IP address or email.
///
/// Composite keys joined with `|` or `,` are masked piecewise.
pub fn mask_identifier(value: &str) -> String {
    if let Some((head, rest)) = value.split_once(['|', ',']) {
        return format!("{}|{}", mask_identifier(head), mask_identifier(rest));
    }
    if value.parse::<IpAddr>().is_ok() {
        return mask_ip(value);
    }
    if value.contains('@') {
        return mask_email(value);
    }
    value.to_string()
}

fn mask_segment(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 => "*".to_string(),
        2 => format!("{}*", chars[0]),
        n => {
            let mut out = String::with_capacity(n);
            out.push(chars[0]);
            out.extend(std::iter::repeat_n('*', n - 2));
            out.push(chars[n - 1]);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("192.168.10.42", "192.168.x.x")]
    #[case(" 10.0.0.1 ", "10.0.x.x")]
    #[case("2001:db8::1", "2001:db8:x:x:x:x:x:x")]
    #[case("not-an-ip", "***")]
    fn test_mask_ip(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask_ip(input), expected);
    }

    #[rstest]
    #[case("john.doe@example.com", "j******e@e*********m")]
    #[case("ab@cd.io", "a*@c***o")]
    #[case("x@y.z", "*@y*z")]
    #[case("missing-at", "***")]
    #[case("@example.com", "***")]
    fn test_mask_email(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask_email(input), expected);
    }

    #[test]
    fn test_mask_identifier_leaves_opaque_ids() {
        assert_eq!(mask_identifier("user-1234"), "user-1234");
        assert_eq!(mask_identifier("172.16.5.4"), "172.16.x.x");
        assert_eq!(mask_identifier("jane@mail.org"), "j**e@m******g");
        assert_eq!(mask_identifier("10.1.2.3|jane@mail.org"), "10.1.x.x|j**e@m******g");
    }
}
