// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! IP literal recognition (SPEC_FULL.md §11, grounded on `scarletio/web_common/helpers.py`'s
//! `is_ipv4_address`/`is_ipv6_address`). Used by the connector to decide whether a `Host` header
//! needs an explicit port suffix and by the TLS wrapper to decide whether hostname verification
//! even applies to the dialed address.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Returns whether `host` parses as a literal IPv4 address (not a hostname that merely looks
/// numeric, e.g. `"1"` or `"1.2"` are rejected by [`Ipv4Addr`]'s strict dotted-quad parser).
#[must_use]
pub fn is_ipv4_literal(host: &str) -> bool {
    host.parse::<Ipv4Addr>().is_ok()
}

/// Returns whether `host` parses as a literal IPv6 address, with or without the `[...]`
/// brackets a URL authority component wraps one in.
#[must_use]
pub fn is_ipv6_literal(host: &str) -> bool {
    let unbracketed = host.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')).unwrap_or(host);
    unbracketed.parse::<Ipv6Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_ipv4_literals() {
        assert!(is_ipv4_literal("127.0.0.1"));
        assert!(is_ipv4_literal("0.0.0.0"));
        assert!(!is_ipv4_literal("example.com"));
        assert!(!is_ipv4_literal("1.2"));
    }

    #[test]
    fn recognizes_ipv6_literals_with_and_without_brackets() {
        assert!(is_ipv6_literal("::1"));
        assert!(is_ipv6_literal("[::1]"));
        assert!(is_ipv6_literal("2001:db8::1"));
        assert!(!is_ipv6_literal("example.com"));
        assert!(!is_ipv6_literal("127.0.0.1"));
    }
}
