//! bzip2 decompression.

use std::io::{BufReader, Read};

use bzip2::bufread::MultiBzDecoder;

/// Wraps `input` in a multi-stream bzip2 decoder.
pub(super) fn decoder<'r>(input: Box<dyn Read + 'r>) -> Box<dyn Read + 'r> {
    Box::new(MultiBzDecoder::new(BufReader::new(input)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::Compression;
    use bzip2::write::BzEncoder;
    use std::io::Write;

    #[test]
    fn test_roundtrip() {
        let mut compressed = Vec::new();
        let mut enc = BzEncoder::new(&mut compressed, Compression::default());
        enc.write_all(b"hello bzip2 world").unwrap();
        enc.finish().unwrap();

        let mut dec = decoder(Box::new(&compressed[..]));
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello bzip2 world");
    }
}
