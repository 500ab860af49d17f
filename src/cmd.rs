//! The accelerator command ABI: request block, parameter block, and status
//! block, plus the function-code and completion vocabulary shared by the
//! engines, the submitter, and the software engine.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::ddl::Dde;

/// Literal/length alphabet size (257 literals/EOB + 29 length codes).
pub(crate) const LLSZ: usize = 286;
/// Distance alphabet size.
pub(crate) const DSZ: usize = 30;
/// Upper bound on the dynamic Huffman table image in the parameter block.
pub(crate) const DHT_MAX_BYTES: usize = 288;

/// Source final block type: where the engine stopped in the input stream.
pub(crate) mod sfbt {
    /// Final EOB consumed; the stream is logically complete.
    pub const FINAL_EOB: u8 = 0b0000;
    /// Suspended inside a stored block; resume needs the remaining count.
    pub const STORED: u8 = 0b1000;
    pub const STORED_BFINAL: u8 = 0b1001;
    /// Suspended inside a fixed-Huffman block.
    pub const FH: u8 = 0b1010;
    pub const FH_BFINAL: u8 = 0b1011;
    /// Suspended inside a dynamic-Huffman block; resume needs the table.
    pub const DH: u8 = 0b1100;
    pub const DH_BFINAL: u8 = 0b1101;
    /// Suspended at a block header boundary.
    pub const HDR: u8 = 0b1110;
    pub const HDR_BFINAL: u8 = 0b1111;
}

/// Engine function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FunctionCode {
    CompressFht = 0,
    CompressDhtCount = 3,
    CompressResumeFht = 4,
    CompressResumeDht = 5,
    CompressResumeFhtCount = 6,
    CompressResumeDhtCount = 7,
    Decompress = 8,
    DecompressResume = 10,
    /// Copy source to target computing both checksums; no initial checksum
    /// is accepted, callers combine instead.
    Wrap = 12,
}

impl FunctionCode {
    /// Function codes that report LZ symbol statistics.
    pub fn has_count(self) -> bool {
        matches!(
            self,
            FunctionCode::CompressDhtCount
                | FunctionCode::CompressResumeFhtCount
                | FunctionCode::CompressResumeDhtCount
        )
    }

    pub fn is_decompress(self) -> bool {
        matches!(self, FunctionCode::Decompress | FunctionCode::DecompressResume)
    }
}

/// Completion-report region of a command; written by the engine when the
/// job finishes, polled by the submitter.
#[repr(C, align(128))]
pub(crate) struct StatusBlock {
    valid: AtomicU8,
    /// Completion code, Table 6-8 vocabulary.
    pub cc: u8,
    /// Completion extension: termination / partial-completion flags.
    pub ce: u8,
    /// Target processed byte count.
    pub tpbc: u32,
    /// Faulting address on translation errors.
    pub fsaddr: u64,
}

pub(crate) const CE_TERMINATION: u8 = 0b10;
pub(crate) const CE_PARTIAL_COMPLETION: u8 = 0b01;

impl StatusBlock {
    pub fn clear(&mut self) {
        self.valid.store(0, Ordering::Relaxed);
        self.cc = 0;
        self.ce = 0;
        self.tpbc = 0;
        self.fsaddr = 0;
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) != 0
    }

    /// Publish a completion: all report fields must be written before the
    /// valid flag is released.
    pub fn complete(&mut self, cc: u8, ce: u8, tpbc: u32) {
        self.cc = cc;
        self.ce = ce;
        self.tpbc = tpbc;
        self.valid.store(1, Ordering::Release);
    }

    pub fn ce_termination(&self) -> bool {
        self.ce & CE_TERMINATION != 0
    }

    pub fn ce_partial_completion(&self) -> bool {
        self.ce & CE_PARTIAL_COMPLETION != 0
    }
}

/// Request block: function code, source/target descriptor heads, and the
/// embedded status block whose address the engine writes back through.
#[repr(C, align(128))]
pub(crate) struct RequestBlock {
    pub gzip_fc: u8,
    pub source_dde: Dde,
    pub target_dde: Dde,
    pub csb_address: u64,
    pub csb: StatusBlock,
}

/// Parameter block. `in_*` fields are written by the library before submit,
/// `out_*` fields by the engine on completion.
#[repr(C)]
pub(crate) struct ParamBlock {
    /// Resume history length in 16-byte units (12 significant bits).
    pub in_histlen: u16,
    /// Bits of the first source byte already consumed on resume.
    pub in_subc: u16,
    /// Block type being resumed.
    pub in_sfbt: u8,
    /// Stored-block bytes remaining on resume.
    pub in_rembytecnt: u32,
    /// Initial checksums for chaining function codes.
    pub in_crc: u32,
    pub in_adler: u32,
    /// Dynamic Huffman table image and its length in bits.
    pub in_dhtlen: u16,
    pub in_dht: DhtImage,

    pub out_crc: u32,
    pub out_adler: u32,
    /// Target ending bit count: valid bits in the last output byte.
    pub out_tebc: u8,
    pub out_sfbt: u8,
    /// Source bits consumed but not processed at suspension.
    pub out_subc: u16,
    pub out_rembytecnt: u32,
    pub out_dhtlen: u16,
    pub out_dht: DhtImage,
    /// Source processed byte counts; which one is valid depends on the
    /// function code.
    pub out_spbc_comp: u32,
    pub out_spbc_comp_with_count: u32,
    pub out_spbc_decomp: u32,
    /// LZ symbol histogram, big-endian 32-bit counts, literal/length then
    /// distance alphabet.
    pub out_lzcount: [u32; LLSZ + DSZ],
}

/// 16-byte aligned Huffman table image as the engine expects it.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub(crate) struct DhtImage(pub [u8; DHT_MAX_BYTES]);

impl DhtImage {
    fn zeroed() -> DhtImage {
        DhtImage([0; DHT_MAX_BYTES])
    }
}

impl ParamBlock {
    fn zeroed() -> ParamBlock {
        ParamBlock {
            in_histlen: 0,
            in_subc: 0,
            in_sfbt: 0,
            in_rembytecnt: 0,
            in_crc: 0,
            in_adler: 0,
            in_dhtlen: 0,
            in_dht: DhtImage::zeroed(),
            out_crc: 0,
            out_adler: 0,
            out_tebc: 0,
            out_sfbt: 0,
            out_subc: 0,
            out_rembytecnt: 0,
            out_dhtlen: 0,
            out_dht: DhtImage::zeroed(),
            out_spbc_comp: 0,
            out_spbc_comp_with_count: 0,
            out_spbc_decomp: 0,
            out_lzcount: [0; LLSZ + DSZ],
        }
    }

    /// History length in bytes as the engine sees it.
    pub fn histlen_bytes(&self) -> u32 {
        u32::from(self.in_histlen) * 16
    }

    /// Record a resume history of `bytes`; must be a 16-byte multiple.
    pub fn set_histlen_bytes(&mut self, bytes: u32) {
        debug_assert_eq!(bytes % 16, 0);
        self.in_histlen = (bytes / 16) as u16;
    }

    /// The source processed byte count for `fc`, including history.
    pub fn spbc(&self, fc: FunctionCode) -> u32 {
        if fc.is_decompress() {
            self.out_spbc_decomp
        } else if fc.has_count() {
            self.out_spbc_comp_with_count
        } else {
            self.out_spbc_comp
        }
    }
}

/// One request record plus one parameter block; a stream owns two of these
/// boxed so their addresses are stable for the duration of a job.
#[repr(C, align(128))]
pub(crate) struct CommandBlock {
    pub crb: RequestBlock,
    pub cpb: ParamBlock,
}

impl CommandBlock {
    pub fn new_boxed() -> Box<CommandBlock> {
        Box::new(CommandBlock {
            crb: RequestBlock {
                gzip_fc: 0,
                source_dde: Dde::default(),
                target_dde: Dde::default(),
                csb_address: 0,
                csb: StatusBlock {
                    valid: AtomicU8::new(0),
                    cc: 0,
                    ce: 0,
                    tpbc: 0,
                    fsaddr: 0,
                },
            },
            cpb: ParamBlock::zeroed(),
        })
    }

    pub fn set_fc(&mut self, fc: FunctionCode) {
        self.crb.gzip_fc = fc as u8;
    }

    /// Stable identity of the stream behind a pasted request; the engines
    /// key per-stream context on it.
    pub fn session_key(&self) -> usize {
        &self.crb.csb as *const StatusBlock as usize
    }
}
