//! DEFLATE compression and decompression offloaded to an NX-style nest
//! accelerator.
//!
//! The accelerator is driven through a user-space paste window: the library
//! assembles scatter/gather descriptor lists over the caller's buffers,
//! pastes a command block, polls the completion status, and stitches the
//! resulting deflate blocks into byte-exact zlib (RFC 1950), raw DEFLATE
//! (RFC 1951), or gzip (RFC 1952) streams. Page faults, partial
//! completions, and output overflow are handled by resubmitting bounded
//! jobs with the 32 KiB history carried across them.
//!
//! The in-memory streaming objects are [`Deflate`] and [`Inflate`]; both
//! operate on caller-owned buffers and can be fed input and drained in
//! arbitrarily sized chunks. A [`Device`] represents one open engine and
//! may be shared by many streams.
//!
//! With the default `software` feature, [`Device::software`] opens an
//! engine that implements the same command ABI in portable Rust, which
//! doubles as the fallback when no accelerator is reachable.
//!
//! ```
//! use nxz::{Compression, Deflate, Device, FlushCompress, FlushDecompress, Inflate, Status, Wrap};
//!
//! let dev = Device::software();
//! let mut out = vec![0u8; 256];
//! let mut d = Deflate::new(&dev, Compression::default(), Wrap::Gzip).unwrap();
//! let status = d.deflate(b"hello, hello!", &mut out, FlushCompress::Finish).unwrap();
//! assert_eq!(status, Status::StreamEnd);
//! let compressed = &out[..d.total_out() as usize];
//!
//! let mut plain = vec![0u8; 256];
//! let mut i = Inflate::new(&dev, Wrap::Gzip).unwrap();
//! let status = i.inflate(compressed, &mut plain, FlushDecompress::Finish).unwrap();
//! assert_eq!(status, Status::StreamEnd);
//! assert_eq!(&plain[..i.total_out() as usize], b"hello, hello!");
//! ```

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod checksum;
mod cmd;
mod config;
mod ddl;
mod deflate;
mod device;
mod dht;
mod error;
mod fifo;
mod gz;
mod inflate;
mod map;
#[cfg(feature = "software")]
mod soft;
mod submit;

pub use crate::config::{Config, Strategy};
pub use crate::deflate::Deflate;
pub use crate::device::{Device, Stats};
pub use crate::error::Error;
pub use crate::gz::GzHeader;
pub use crate::inflate::Inflate;

/// Stream framing around the raw DEFLATE data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    /// Raw DEFLATE blocks with no header or trailer.
    Raw,
    /// RFC 1950: 2-byte header, big-endian Adler-32 trailer.
    Zlib,
    /// RFC 1952: gzip member header, little-endian CRC-32 and size trailer.
    Gzip,
    /// Decompression only: pick zlib or gzip from the first byte.
    Auto,
}

/// When compressing data, the compression level can be specified by a value
/// in this struct.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Compression(u32);

impl Compression {
    /// Creates a new description of the compression level with an explicitly
    /// specified integer (0-9).
    pub const fn new(level: u32) -> Compression {
        Compression(level)
    }

    /// No compression: the input is carried in stored blocks.
    pub const fn none() -> Compression {
        Compression(0)
    }

    /// Optimize for the best speed of encoding.
    pub const fn fast() -> Compression {
        Compression(1)
    }

    /// Optimize for the size of data being encoded.
    pub const fn best() -> Compression {
        Compression(9)
    }

    /// Returns an integer representing the compression level, typically on a
    /// scale of 0-9.
    pub fn level(&self) -> u32 {
        self.0
    }
}

impl Default for Compression {
    fn default() -> Compression {
        Compression(6)
    }
}

/// Values which indicate the form of flushing to be used when compressing
/// in-memory data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlushCompress {
    /// A typical parameter for passing to compression/decompression
    /// functions, this indicates that the underlying stream should decide
    /// how much data to accumulate before producing output.
    None,

    /// All pending output is flushed and the output ends with two empty
    /// deflate blocks so a decompressor can resume decoding mid-stream.
    Partial,

    /// All pending output is flushed to the output buffer and the output is
    /// aligned on a byte boundary by an empty stored block.
    Sync,

    /// Like `Sync`, and the decompression state is also reset so decoding
    /// can restart at this point.
    Full,

    /// Pending input is processed, pending output is flushed, and the
    /// stream trailer is written.
    Finish,
}

/// Values which indicate the form of flushing to be used when
/// decompressing in-memory data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlushDecompress {
    /// The stream decides how much output to produce.
    None,

    /// As much output as possible is produced.
    Sync,

    /// No further input will arrive; everything must come out now.
    Finish,
}

/// Possible status results of compressing some data or successfully
/// decompressing a block of data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Indicates success.
    ///
    /// Means that more input may be needed but isn't available
    /// and/or there's more output to be written but the output buffer is
    /// full.
    Ok,

    /// Indicates that forward progress is not possible due to input or
    /// output buffers being empty.
    ///
    /// For compression it means the input buffer needs some more data or
    /// the output buffer needs to be freed up before trying again.
    ///
    /// For decompression this means that more input is needed to continue
    /// or the output buffer isn't large enough to contain the result. The
    /// function can be called again after fixing both.
    BufError,

    /// Indicates that all input has been consumed and all output bytes
    /// have been written. The stream should not be used again.
    ///
    /// For decompression the trailing checksum of the stream has also been
    /// verified.
    StreamEnd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_levels() {
        assert_eq!(Compression::default().level(), 6);
        assert_eq!(Compression::none().level(), 0);
        assert_eq!(Compression::fast().level(), 1);
        assert_eq!(Compression::best().level(), 9);
    }
}
