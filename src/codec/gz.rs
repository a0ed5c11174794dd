//! gzip decompression (RFC 1952), multi-member aware.

use std::io::{BufReader, Read, Write};

use flate2::Compression;
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;

/// Wraps `input` in a multi-member gzip decoder.
///
/// Multi-member awareness matters for concatenated `.gz` files (as produced
/// by `cat a.gz b.gz`): the decompressed child stream is the concatenation of
/// all members, which is what `gzip -d` produces.
pub(super) fn decoder<'r>(input: Box<dyn Read + 'r>) -> Box<dyn Read + 'r> {
    Box::new(MultiGzDecoder::new(BufReader::new(input)))
}

/// Wraps `output` in a gzip encoder at the default level.
pub(super) fn encoder<'w>(output: Box<dyn Write + 'w>) -> Box<dyn Write + 'w> {
    Box::new(GzEncoder::new(output, Compression::default()))
}
