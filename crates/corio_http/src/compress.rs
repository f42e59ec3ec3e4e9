// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Streaming `Content-Encoding` compression for the write path (spec §4.7 "compression is
//! applied transparently when requested"). Mirrors [`crate::decompress::Decompressor`].

use std::io::{Read, Write};

use crate::error::Error;

/// A streaming encoder for one of the content encodings this crate can produce:
/// `identity`, `gzip`, or `deflate`. `br` is supported but, like [`crate::decompress::Decompressor`]'s
/// brotli branch, buffers its input and encodes once at [`Compressor::finish`].
pub enum Compressor {
    /// No transformation.
    Identity,
    /// `gzip`, encoded incrementally as bytes arrive.
    Gzip(Box<flate2::write::GzEncoder<Vec<u8>>>),
    /// `deflate` (zlib-wrapped), encoded incrementally as bytes arrive.
    Deflate(Box<flate2::write::DeflateEncoder<Vec<u8>>>),
    /// `br`, buffered and encoded whole at [`Compressor::finish`].
    Brotli(Vec<u8>),
}

impl Compressor {
    /// Builds a compressor for the named `Content-Encoding`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEncoding`] for anything other than `identity`, `gzip`,
    /// `deflate`, or `br`.
    pub fn for_encoding(encoding: &str) -> Result<Self, Error> {
        match encoding.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Self::Identity),
            "gzip" => Ok(Self::Gzip(Box::new(flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )))),
            "deflate" => Ok(Self::Deflate(Box::new(flate2::write::DeflateEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )))),
            "br" => Ok(Self::Brotli(Vec::new())),
            other => Err(Error::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Feeds newly-produced plaintext bytes, returning whatever encoded bytes became available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compress`] if the underlying encoder reports an I/O failure.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Gzip(encoder) => {
                encoder
                    .write_all(data)
                    .map_err(|error| Error::Compress(error.to_string()))?;
                Ok(std::mem::take(encoder.get_mut()))
            }
            Self::Deflate(encoder) => {
                encoder
                    .write_all(data)
                    .map_err(|error| Error::Compress(error.to_string()))?;
                Ok(std::mem::take(encoder.get_mut()))
            }
            Self::Brotli(buffer) => {
                buffer.extend_from_slice(data);
                Ok(Vec::new())
            }
        }
    }

    /// Finalizes the stream, returning any remaining encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compress`] if the underlying encoder reports an I/O failure.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Gzip(encoder) => encoder
                .finish()
                .map_err(|error| Error::Compress(error.to_string())),
            Self::Deflate(encoder) => encoder
                .finish()
                .map_err(|error| Error::Compress(error.to_string())),
            Self::Brotli(buffer) => {
                let mut output = Vec::new();
                brotli::CompressorReader::new(buffer.as_slice(), 4096, 5, 22)
                    .read_to_end(&mut output)
                    .map_err(|error| Error::Compress(error.to_string()))?;
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::Decompressor;

    #[test]
    fn gzip_round_trips_through_decompressor() {
        let mut compressor = Compressor::for_encoding("gzip").unwrap();
        let mut compressed = compressor.feed(b"hey mister").unwrap();
        compressed.extend(compressor.finish().unwrap());

        let mut decompressor = Decompressor::for_encoding("gzip").unwrap();
        let mut decoded = decompressor.feed(&compressed).unwrap();
        decoded.extend(decompressor.finish().unwrap());

        assert_eq!(decoded, b"hey mister");
    }

    #[test]
    fn identity_passes_through() {
        let mut compressor = Compressor::for_encoding("identity").unwrap();
        assert_eq!(compressor.feed(b"raw").unwrap(), b"raw");
        assert_eq!(compressor.finish().unwrap(), Vec::<u8>::new());
    }
}
