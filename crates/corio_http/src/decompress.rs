// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Streaming `Content-Encoding` decompression interposed on a body reader (spec §4.7: "a
//! streaming decompressor is interposed; chunks are yielded to the consumer as decoded bytes").

use std::io::{Read, Write};

use crate::error::Error;

/// A streaming decoder for one of the content encodings spec §6 names as accepted:
/// `identity`, `gzip`, `deflate`, or `br`.
pub enum Decompressor {
    /// No transformation.
    Identity,
    /// `gzip`, decoded incrementally as bytes arrive.
    Gzip(Box<flate2::write::GzDecoder<Vec<u8>>>),
    /// `deflate` (zlib-wrapped), decoded incrementally as bytes arrive.
    Deflate(Box<flate2::write::DeflateDecoder<Vec<u8>>>),
    /// `br`. Brotli's streaming writer doesn't expose an incremental flush-to-output in the way
    /// gzip/deflate's do, so compressed bytes are buffered and decoded once the body completes.
    Brotli(Vec<u8>),
}

impl Decompressor {
    /// Builds a decompressor for the named `Content-Encoding`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for anything other than `identity`, `gzip`,
    /// `x-gzip`, `deflate`, or `br`.
    pub fn for_encoding(encoding: &str) -> Result<Self, Error> {
        match encoding.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Self::Identity),
            "gzip" | "x-gzip" => Ok(Self::Gzip(Box::new(flate2::write::GzDecoder::new(Vec::new())))),
            "deflate" => Ok(Self::Deflate(Box::new(flate2::write::DeflateDecoder::new(Vec::new())))),
            "br" => Ok(Self::Brotli(Vec::new())),
            other => Err(Error::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Feeds newly-arrived compressed bytes, returning whatever decoded bytes became available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decompress`] if the compressed stream is malformed.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Gzip(decoder) => {
                decoder
                    .write_all(data)
                    .map_err(|error| Error::Decompress(error.to_string()))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
            Self::Deflate(decoder) => {
                decoder
                    .write_all(data)
                    .map_err(|error| Error::Decompress(error.to_string()))?;
                Ok(std::mem::take(decoder.get_mut()))
            }
            Self::Brotli(buffer) => {
                buffer.extend_from_slice(data);
                Ok(Vec::new())
            }
        }
    }

    /// Finalizes the stream once the body completes, returning any remaining decoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decompress`] if the compressed stream ended in an invalid state (e.g. a
    /// truncated gzip trailer or invalid brotli stream).
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Gzip(decoder) => decoder
                .finish()
                .map_err(|error| Error::Decompress(error.to_string())),
            Self::Deflate(decoder) => decoder
                .finish()
                .map_err(|error| Error::Decompress(error.to_string())),
            Self::Brotli(buffer) => {
                let mut output = Vec::new();
                brotli::Decompressor::new(buffer.as_slice(), 4096)
                    .read_to_end(&mut output)
                    .map_err(|error| Error::Decompress(error.to_string()))?;
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn identity_passes_bytes_through_unchanged() {
        let mut decompressor = Decompressor::for_encoding("identity").unwrap();
        assert_eq!(decompressor.feed(b"hello").unwrap(), b"hello");
        assert_eq!(decompressor.finish().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn gzip_round_trips_across_two_feeds() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hey mister").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressor = Decompressor::for_encoding("gzip").unwrap();
        let midpoint = compressed.len() / 2;
        let mut decoded = decompressor.feed(&compressed[..midpoint]).unwrap();
        decoded.extend(decompressor.feed(&compressed[midpoint..]).unwrap());
        decoded.extend(decompressor.finish().unwrap());

        assert_eq!(decoded, b"hey mister");
    }

    #[test]
    fn deflate_round_trips() {
        let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hey mister").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressor = Decompressor::for_encoding("deflate").unwrap();
        let mut decoded = decompressor.feed(&compressed).unwrap();
        decoded.extend(decompressor.finish().unwrap());

        assert_eq!(decoded, b"hey mister");
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(matches!(
            Decompressor::for_encoding("zstd"),
            Err(Error::UnsupportedEncoding(_))
        ));
    }
}
