//! Gzip member header handling shared by both directions: composed and
//! emitted on the deflate side, parsed and captured on the inflate side.

/// FLG bits of the gzip header.
pub(crate) const FTEXT: u8 = 1 << 0;
pub(crate) const FHCRC: u8 = 1 << 1;
pub(crate) const FEXTRA: u8 = 1 << 2;
pub(crate) const FNAME: u8 = 1 << 3;
pub(crate) const FCOMMENT: u8 = 1 << 4;
/// The upper three FLG bits are reserved and must be zero.
pub(crate) const FRESERVED: u8 = 0xe0;

/// A structure representing the header of a gzip stream.
///
/// The header can contain metadata about the file that was compressed, if
/// present. The same type configures the header written by
/// [`Deflate::set_header`](crate::Deflate::set_header) and carries the
/// fields recovered by [`Inflate::header`](crate::Inflate::header).
#[derive(PartialEq, Clone, Debug, Default)]
pub struct GzHeader {
    pub(crate) text: bool,
    pub(crate) hcrc: bool,
    pub(crate) extra: Option<Vec<u8>>,
    pub(crate) filename: Option<Vec<u8>>,
    pub(crate) comment: Option<Vec<u8>>,
    pub(crate) operating_system: u8,
    pub(crate) xflags: u8,
    pub(crate) mtime: u32,
}

impl GzHeader {
    /// A blank header: no metadata, XFL "fastest", OS Unix.
    pub fn new() -> GzHeader {
        GzHeader {
            operating_system: 3,
            xflags: 4,
            ..GzHeader::default()
        }
    }

    /// Returns the `filename` field of this gzip stream's header, if present.
    pub fn filename(&self) -> Option<&[u8]> {
        self.filename.as_deref()
    }

    /// Returns the `extra` field of this gzip stream's header, if present.
    pub fn extra(&self) -> Option<&[u8]> {
        self.extra.as_deref()
    }

    /// Returns the `comment` field of this gzip stream's header, if present.
    pub fn comment(&self) -> Option<&[u8]> {
        self.comment.as_deref()
    }

    /// Returns the `operating_system` field of this gzip stream's header.
    pub fn operating_system(&self) -> u8 {
        self.operating_system
    }

    /// This gives the most recent modification time of the original file
    /// being compressed, in Unix time. 0 means no time stamp is available.
    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    /// Whether the FLG field marked the member as probably text.
    pub fn is_text(&self) -> bool {
        self.text
    }

    /// Whether the header carried (or should carry) a CRC16 of itself.
    pub fn has_hcrc(&self) -> bool {
        self.hcrc
    }

    /// Configure the `mtime` field.
    pub fn set_mtime(mut self, mtime: u32) -> GzHeader {
        self.mtime = mtime;
        self
    }

    /// Configure the `operating_system` field.
    pub fn set_operating_system(mut self, os: u8) -> GzHeader {
        self.operating_system = os;
        self
    }

    /// Configure the `extra` field.
    pub fn set_extra<T: Into<Vec<u8>>>(mut self, extra: T) -> GzHeader {
        self.extra = Some(extra.into());
        self
    }

    /// Configure the `filename` field.
    ///
    /// # Panics
    ///
    /// Panics if the `filename` slice contains a zero.
    pub fn set_filename<T: Into<Vec<u8>>>(mut self, filename: T) -> GzHeader {
        let filename = filename.into();
        assert!(!filename.contains(&0), "gzip filename may not contain NUL");
        self.filename = Some(filename);
        self
    }

    /// Configure the `comment` field.
    ///
    /// # Panics
    ///
    /// Panics if the `comment` slice contains a zero.
    pub fn set_comment<T: Into<Vec<u8>>>(mut self, comment: T) -> GzHeader {
        let comment = comment.into();
        assert!(!comment.contains(&0), "gzip comment may not contain NUL");
        self.comment = Some(comment);
        self
    }

    /// Mark the member as text.
    pub fn set_text(mut self, text: bool) -> GzHeader {
        self.text = text;
        self
    }

    /// Request a header CRC16.
    pub fn set_hcrc(mut self, hcrc: bool) -> GzHeader {
        self.hcrc = hcrc;
        self
    }

    /// Serialize the header, including the CRC16 when requested.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut flg = 0u8;
        if self.text {
            flg |= FTEXT;
        }
        if self.hcrc {
            flg |= FHCRC;
        }
        if self.extra.is_some() {
            flg |= FEXTRA;
        }
        if self.filename.is_some() {
            flg |= FNAME;
        }
        if self.comment.is_some() {
            flg |= FCOMMENT;
        }

        let mut out = vec![
            0x1f,
            0x8b,
            0x08,
            flg,
            self.mtime as u8,
            (self.mtime >> 8) as u8,
            (self.mtime >> 16) as u8,
            (self.mtime >> 24) as u8,
            self.xflags,
            self.operating_system,
        ];
        if let Some(extra) = &self.extra {
            out.push(extra.len() as u8);
            out.push((extra.len() >> 8) as u8);
            out.extend_from_slice(extra);
        }
        if let Some(name) = &self.filename {
            out.extend_from_slice(name);
            out.push(0);
        }
        if let Some(comment) = &self.comment {
            out.extend_from_slice(comment);
            out.push(0);
        }
        if self.hcrc {
            let crc = crate::checksum::crc32(0, &out);
            out.push(crc as u8);
            out.push((crc >> 8) as u8);
        }
        out
    }
}

/// The 10 blank header bytes emitted when the caller did not install one.
pub(crate) const BLANK_HEADER: [u8; 10] =
    [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x03];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_header_matches_the_builder() {
        assert_eq!(GzHeader::new().to_bytes(), BLANK_HEADER);
    }

    #[test]
    fn fields_are_serialized_in_order() {
        let h = GzHeader::new()
            .set_filename("foo.rs")
            .set_comment("bar")
            .set_extra(vec![0, 1, 2, 3])
            .set_mtime(0x0102_0304);
        let bytes = h.to_bytes();
        assert_eq!(bytes[3], FEXTRA | FNAME | FCOMMENT);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[10..12], &[4, 0]); // XLEN
        assert_eq!(&bytes[12..16], &[0, 1, 2, 3]);
        assert_eq!(&bytes[16..23], b"foo.rs\0");
        assert_eq!(&bytes[23..27], b"bar\0");
    }

    #[test]
    fn hcrc_covers_everything_before_it() {
        let h = GzHeader::new().set_hcrc(true).set_filename("x");
        let bytes = h.to_bytes();
        let n = bytes.len();
        let crc = crate::checksum::crc32(0, &bytes[..n - 2]);
        assert_eq!(bytes[n - 2], crc as u8);
        assert_eq!(bytes[n - 1], (crc >> 8) as u8);
    }

    #[test]
    #[should_panic]
    fn filename_rejects_nul() {
        let _ = GzHeader::new().set_filename(&b"a\0b"[..]);
    }
}
