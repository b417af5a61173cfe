//! Transparent decompression of input files.
//!
//! Input directories may mix plain `.csv` files with compressed ones. Each
//! [`InputCodec`] names its extensions and, optionally, a magic-byte
//! signature. Detection checks the extension first and falls back to the
//! leading bytes of the stream, so a mis-named compressed file still reads.
//!
//! Built-in codecs, each behind a cargo feature:
//! - **Gzip** (`.gz`) via `flate2` (feature `compression-gzip`)
//! - **Zstd** (`.zst`) via `zstd` (feature `compression-zstd`)

use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// A decompressor the reader can put in front of a raw file.
pub trait InputCodec: Send + Sync {
    /// Human-readable codec name (e.g. "gzip").
    fn name(&self) -> &'static str;

    /// Lowercase extensions with the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Leading bytes of a stream in this format, if the format has any.
    fn magic_bytes(&self) -> Option<&'static [u8]>;

    fn wrap_reader(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>>;
}

/// Codecs compiled into this build.
pub fn builtin_codecs() -> Vec<&'static dyn InputCodec> {
    let codecs: Vec<&'static dyn InputCodec> = vec![
        #[cfg(feature = "compression-gzip")]
        &GzipCodec,
        #[cfg(feature = "compression-zstd")]
        &ZstdCodec,
    ];
    codecs
}

/// Extensions (without the `.csv` part) that input discovery accepts.
pub fn compressed_extensions() -> Vec<&'static str> {
    builtin_codecs()
        .into_iter()
        .flat_map(|c| c.extensions().iter().copied())
        .collect()
}

fn detect_from_extension(path: &Path) -> Option<&'static dyn InputCodec> {
    let name = path.to_string_lossy().to_lowercase();
    builtin_codecs()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<&'static dyn InputCodec> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    builtin_codecs()
        .into_iter()
        .find(|codec| codec.magic_bytes().is_some_and(|magic| buf.starts_with(magic)))
}

/// Wrap `reader` with the decompressor matching `path`, or buffer it as-is.
pub fn open_decoded<R: Read + 'static>(reader: R, path: &Path) -> io::Result<Box<dyn Read>> {
    if let Some(codec) = detect_from_extension(path) {
        tracing::debug!(path = %path.display(), codec = codec.name(), "decompressing input");
        return codec.wrap_reader(Box::new(reader));
    }

    let mut buffered = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buffered) {
        tracing::debug!(
            path = %path.display(),
            codec = codec.name(),
            "decompressing input detected by magic bytes"
        );
        return codec.wrap_reader(Box::new(buffered));
    }
    Ok(Box::new(buffered))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl InputCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".gz"]
    }

    fn magic_bytes(&self) -> Option<&'static [u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl InputCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".zst"]
    }

    fn magic_bytes(&self) -> Option<&'static [u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }
}
