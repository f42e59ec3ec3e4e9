// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Parsing and formatting for the `Keep-Alive` header (spec §4.7 "Header value helpers").

/// The default connection timeout, in seconds, used when a `Keep-Alive` header omits `timeout=`.
pub const CONNECTION_TIMEOUT_DEFAULT: f64 = 15.0;
/// The default maximum request count, used when a `Keep-Alive` header omits `max=`. Zero means
/// unbounded.
pub const MAX_REQUESTS_DEFAULT: u64 = 0;

const CONNECTION_TIMEOUT_KEY: &str = "timeout";
const MAX_REQUESTS_KEY: &str = "max";

/// The `timeout=`/`max=` pair carried by a `Keep-Alive` header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeepAliveInfo {
    /// The connection's idle timeout, in seconds.
    pub connection_timeout: f64,
    /// The maximum number of requests allowed on the connection. Zero means unbounded.
    pub max_requests: u64,
}

impl KeepAliveInfo {
    /// The defaults used when no `Keep-Alive` header is present at all.
    #[must_use]
    pub const fn create_default() -> Self {
        Self {
            connection_timeout: CONNECTION_TIMEOUT_DEFAULT,
            max_requests: MAX_REQUESTS_DEFAULT,
        }
    }

    /// Parses a `Keep-Alive` header value such as `"timeout=5, max=1000"`.
    ///
    /// Unknown keys are ignored. A key whose value fails to parse is ignored too, leaving that
    /// field at its default (matches the reference implementation: a malformed `timeout=` or
    /// `max=` is not a parse error, just a no-op for that key).
    #[must_use]
    pub fn from_header_value(header_value: Option<&str>) -> Self {
        let mut info = Self::create_default();

        let Some(header_value) = header_value else {
            return info;
        };

        for item in header_value.split(',') {
            let item = item.trim();
            let Some((key, value)) = item.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                CONNECTION_TIMEOUT_KEY => {
                    if let Ok(timeout) = value.parse::<f64>() {
                        info.connection_timeout = timeout;
                    }
                }
                MAX_REQUESTS_KEY => {
                    if let Ok(max) = value.parse::<u64>() {
                        info.max_requests = max;
                    }
                }
                _ => {}
            }
        }

        info
    }

    /// Formats this info back into a header value, or `None` if both fields are at their
    /// defaults (in which case the header need not be sent at all).
    #[must_use]
    pub fn to_header_value(&self) -> Option<String> {
        let mut parts = Vec::new();

        if (self.connection_timeout - CONNECTION_TIMEOUT_DEFAULT).abs() > f64::EPSILON {
            parts.push(format!("{CONNECTION_TIMEOUT_KEY}={:.0}", self.connection_timeout));
        }

        if self.max_requests != MAX_REQUESTS_DEFAULT {
            parts.push(format!("{MAX_REQUESTS_KEY}={}", self.max_requests));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}

impl Default for KeepAliveInfo {
    fn default() -> Self {
        Self::create_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_is_all_defaults() {
        let info = KeepAliveInfo::from_header_value(None);
        assert_eq!(info, KeepAliveInfo::create_default());
        assert_eq!(info.to_header_value(), None);
    }

    #[test]
    fn parses_both_keys_case_insensitively() {
        let info = KeepAliveInfo::from_header_value(Some("Timeout=5, MAX=1000"));
        assert_eq!(info.connection_timeout, 5.0);
        assert_eq!(info.max_requests, 1000);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let info = KeepAliveInfo::from_header_value(Some("timeout=5, frobnicate=1, max=2"));
        assert_eq!(info.connection_timeout, 5.0);
        assert_eq!(info.max_requests, 2);
    }

    #[test]
    fn unparsable_value_leaves_default() {
        let info = KeepAliveInfo::from_header_value(Some("timeout=not-a-number"));
        assert_eq!(info.connection_timeout, CONNECTION_TIMEOUT_DEFAULT);
    }

    #[test]
    fn round_trips_through_header_value() {
        let info = KeepAliveInfo {
            connection_timeout: 30.0,
            max_requests: 500,
        };
        let header = info.to_header_value().expect("non-default info");
        assert_eq!(KeepAliveInfo::from_header_value(Some(&header)), info);
    }
}
