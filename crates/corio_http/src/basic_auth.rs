// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Parsing and formatting for HTTP Basic authorization (`Authorization: Basic ...`), spec §4.7
//! "Header value helpers".

use base64::Engine as _;

use crate::error::Error;

/// The text encoding used to turn `user_id:password` into bytes before base64-encoding them.
///
/// [RFC 7617](https://www.rfc-editor.org/rfc/rfc7617) allows UTF-8, but a large population of
/// deployed servers still expect the legacy Latin-1 (ISO-8859-1) behavior, which is why that
/// remains the default here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// ISO-8859-1: one byte per codepoint, codepoints above `U+00FF` cannot be represented.
    Latin1,
    /// UTF-8.
    Utf8,
}

impl Default for Encoding {
    fn default() -> Self {
        Self::Latin1
    }
}

/// A parsed (or about-to-be-sent) HTTP Basic authorization credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthorization {
    /// The authorization user identifier. Never contains `:`.
    pub user_id: String,
    /// The authorization password. May be empty.
    pub password: String,
    /// The encoding used when turning `user_id:password` into bytes.
    pub encoding: Encoding,
}

impl BasicAuthorization {
    /// Creates a new credential pair using [`Encoding::Latin1`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if `user_id` contains `:`, which is used as the user/password
    /// separator and therefore cannot appear in the user id itself.
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Result<Self, Error> {
        Self::with_encoding(user_id, password, Encoding::default())
    }

    /// Creates a new credential pair with an explicit encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if `user_id` contains `:`.
    pub fn with_encoding(
        user_id: impl Into<String>,
        password: impl Into<String>,
        encoding: Encoding,
    ) -> Result<Self, Error> {
        let user_id = user_id.into();
        if user_id.contains(':') {
            return Err(Error::Payload(format!(
                "basic authorization user_id cannot contain ':': {user_id:?}"
            )));
        }

        Ok(Self {
            user_id,
            password: password.into(),
            encoding,
        })
    }

    /// Parses an `Authorization` header value such as `"Basic dXNlcjpwYXNz"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if the header isn't `<scheme> <token>`, the scheme (compared
    /// case-insensitively) isn't `basic`, the token isn't valid base64, or the decoded bytes
    /// aren't valid under `encoding`.
    pub fn from_header(header_value: &str, encoding: Encoding) -> Result<Self, Error> {
        let header_value = header_value.trim();
        let Some((scheme, token)) = header_value.split_once(char::is_whitespace) else {
            return Err(Error::Payload(format!(
                "could not parse authorization header: {header_value:?}"
            )));
        };

        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(Error::Payload(format!(
                "non-basic authorization method: {scheme:?}"
            )));
        }

        let token = token.trim();
        let decoded_bytes = base64::engine::general_purpose::STANDARD
            .decode(token)
            .map_err(|error| Error::Payload(format!("could not decode token {token:?}: {error}")))?;

        let decoded = decode_with_encoding(&decoded_bytes, encoding)
            .map_err(|error| Error::Payload(format!("could not decode token {token:?}: {error}")))?;

        let (user_id, password) = match decoded.split_once(':') {
            Some((user_id, password)) => (user_id.to_string(), password.to_string()),
            None => (decoded, String::new()),
        };

        Ok(Self {
            user_id,
            password,
            encoding,
        })
    }

    /// Formats this credential pair as an `Authorization` header value.
    ///
    /// # Panics
    ///
    /// Panics if `user_id`/`password` contain a character that cannot be represented under
    /// `self.encoding` (only possible with [`Encoding::Latin1`] and a codepoint above `U+00FF`,
    /// which can only happen if the struct was constructed by hand rather than via
    /// [`BasicAuthorization::new`]/[`BasicAuthorization::from_header`]).
    #[must_use]
    pub fn to_header(&self) -> String {
        let credentials = format!("{}:{}", self.user_id, self.password);
        let encoded_bytes = encode_with_encoding(&credentials, self.encoding)
            .expect("user_id/password must be representable in the configured encoding");
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(encoded_bytes)
        )
    }
}

fn decode_with_encoding(bytes: &[u8], encoding: Encoding) -> Result<String, String> {
    match encoding {
        Encoding::Latin1 => Ok(bytes.iter().map(|&byte| byte as char).collect()),
        Encoding::Utf8 => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|error| error.to_string()),
    }
}

fn encode_with_encoding(text: &str, encoding: Encoding) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Latin1 => text
            .chars()
            .map(|character| {
                u8::try_from(u32::from(character))
                    .map_err(|_| format!("character {character:?} is not representable in latin1"))
            })
            .collect(),
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_header() {
        let auth = BasicAuthorization::new("alice", "hunter2").expect("valid user_id");
        let header = auth.to_header();
        assert_eq!(header, "Basic YWxpY2U6aHVudGVyMg==");

        let parsed = BasicAuthorization::from_header(&header, Encoding::Latin1).expect("valid header");
        assert_eq!(parsed, auth);
    }

    #[test]
    fn empty_password_round_trips() {
        let auth = BasicAuthorization::new("alice", "").expect("valid user_id");
        let parsed = BasicAuthorization::from_header(&auth.to_header(), Encoding::Latin1).unwrap();
        assert_eq!(parsed.user_id, "alice");
        assert_eq!(parsed.password, "");
    }

    #[test]
    fn user_id_with_colon_is_rejected() {
        let result = BasicAuthorization::new("al:ice", "pw");
        assert!(matches!(result, Err(Error::Payload(_))));
    }

    #[test]
    fn non_basic_scheme_is_rejected() {
        let result = BasicAuthorization::from_header("Bearer abcd", Encoding::Latin1);
        assert!(matches!(result, Err(Error::Payload(_))));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let result = BasicAuthorization::from_header("Basic not-valid-base64!!", Encoding::Latin1);
        assert!(matches!(result, Err(Error::Payload(_))));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let auth = BasicAuthorization::new("alice", "hunter2").expect("valid user_id");
        let header = auth.to_header().replace("Basic", "BASIC");
        let parsed = BasicAuthorization::from_header(&header, Encoding::Latin1).expect("valid header");
        assert_eq!(parsed, auth);
    }
}
