use thiserror::Error;

/// Errors surfaced to callers of [`Deflate`](crate::Deflate) and
/// [`Inflate`](crate::Inflate).
///
/// Non-fatal conditions (output full, more input needed) are reported through
/// [`Status`](crate::Status) instead; everything here either rejects the call
/// or leaves the stream permanently failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The stream state or the arguments are inconsistent, e.g. an
    /// unsupported flush value or input offered after the trailer.
    #[error("stream error: {0}")]
    Stream(&'static str),

    /// The input is not a valid deflate/zlib/gzip stream, or a checksum
    /// did not verify. The stream is permanently failed.
    #[error("data error: {0}")]
    Data(&'static str),

    /// An internal buffer could not be allocated.
    #[error("out of memory")]
    Mem,

    /// Decompression needs a preset dictionary. The Adler-32 of the
    /// expected dictionary is carried so the caller can locate it.
    #[error("dictionary needed (id {0:#010x})")]
    NeedDict(u32),

    /// The accelerator did not complete the job in the allotted time, or
    /// another transport-level failure occurred.
    #[error("accelerator error: {0}")]
    Errno(&'static str),
}

/// Internal result ladder of the compress paths. Transient conditions
/// (page faults, target space, rejected pastes) are retried before a job
/// returns; fatal ones surface directly as [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NxStatus {
    Ok,
    /// Job suspended on a byte-count limit; resume fields are valid.
    OkSuspend,
    /// Compressed output was larger than the input.
    OkBigTarget,
    /// Nothing to do; no job was issued.
    OkNoAvailOut,
}

/// Completion codes reported in the status block, Table 6-8 subset the
/// library acts on. Anything else is treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum CompCode {
    Ok = 0,
    /// Partial completion or history-length error; the CE bits decide.
    DataLength = 3,
    /// Address translation fault; the faulting address is in the status
    /// block and the job must be resubmitted.
    Translation = 5,
    /// Target buffer too small; no results are valid.
    TargetSpace = 13,
    ExcessiveDde = 14,
    /// The source stream is not valid deflate data.
    DataError = 23,
    SegmentedDdl = 31,
    DdeOverflow = 33,
    /// Output byte count exceeded the input; results are valid but the
    /// caller may prefer a stored block.
    TpbcGtSpbc = 64,
    InvalidHistLen = 66,
    UnsupportedFc = 67,
    Unknown = 255,
}

impl CompCode {
    pub(crate) fn from_raw(cc: u8) -> CompCode {
        match cc {
            0 => CompCode::Ok,
            3 => CompCode::DataLength,
            5 => CompCode::Translation,
            13 => CompCode::TargetSpace,
            14 => CompCode::ExcessiveDde,
            23 => CompCode::DataError,
            31 => CompCode::SegmentedDdl,
            33 => CompCode::DdeOverflow,
            64 => CompCode::TpbcGtSpbc,
            66 => CompCode::InvalidHistLen,
            67 => CompCode::UnsupportedFc,
            _ => CompCode::Unknown,
        }
    }
}

/// Transport-level failures from the submit path, distinct from engine
/// completion codes.
#[derive(Debug, Error)]
pub(crate) enum SubmitError {
    #[error("job did not complete in the allotted time")]
    Timeout,
    #[error("paste was rejected {0} times, giving up")]
    PasteBudget(u32),
}
