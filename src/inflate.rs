//! Streaming DEFLATE decompression through the accelerator.
//!
//! A byte-at-a-time header state machine recognizes gzip, zlib, or raw
//! framing (or auto-detects), then a resumable loop feeds the engine
//! bounded jobs, carrying the 32 KiB window and the suspension clues
//! (source final block type, sub-byte bit count) from one job to the next.
//! The trailing checksum is verified once the final EOB has been seen.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::checksum::{adler32, crc32, INIT_ADLER, INIT_CRC};
use crate::cmd::{sfbt, CommandBlock, FunctionCode};
use crate::config::Config;
use crate::ddl::DdeList;
use crate::device::Device;
use crate::error::{CompCode, Error};
use crate::fifo::Fifo;
use crate::gz::{self, GzHeader};
use crate::submit::submit_job;
use crate::{FlushDecompress, Status, Wrap};

/// Fixed 32 KiB history length.
const HIS_LEN: usize = 1 << 15;

/// Header parse and decompression phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfState {
    Header,
    GzipId1,
    GzipId2,
    GzipCm,
    GzipFlg,
    GzipMtime,
    GzipXfl,
    GzipOs,
    GzipXlen,
    GzipExtra,
    GzipName,
    GzipComment,
    GzipHcrc,
    ZlibId1,
    ZlibFlg,
    ZlibDictId,
    ZlibDict,
    Body,
    Failed,
}

struct Io<'a> {
    input: &'a [u8],
    in_pos: usize,
    output: &'a mut [u8],
    out_pos: usize,
}

impl<'a> Io<'a> {
    fn avail_in(&self) -> usize {
        self.input.len() - self.in_pos
    }

    fn avail_out(&self) -> usize {
        self.output.len() - self.out_pos
    }
}

/// Raw in-memory decompression stream.
///
/// The mirror of [`Deflate`](crate::Deflate): consumes deflate, zlib, or
/// gzip data and produces the original bytes, going through the accelerator
/// in bounded jobs while the 32 KiB history is carried across calls.
pub struct Inflate {
    dev: Arc<Device>,
    cfg: Config,
    /// Framing requested at construction; `Auto` resolves on the first byte.
    wrap: Wrap,
    /// Framing actually in effect once the header has been seen.
    active: Wrap,

    state: InfState,
    total_in: u64,
    total_out: u64,
    adler: u32,
    crc: u32,

    // header scratch
    ckbuf: [u8; 128],
    ckidx: usize,
    /// Running CRC-32 of header bytes for the optional FHCRC check.
    cksum: u32,
    hcrc16: u16,
    gzflags: u8,
    zlib_cmf: u8,
    inf_held: usize,
    length: usize,
    gzhead: Option<GzHeader>,
    gzhead_done: bool,

    dict: Vec<u8>,
    dict_id: u32,
    dict_armed: bool,

    resuming: bool,
    history_len: usize,
    is_final: bool,
    trailer: [u8; 8],
    trailer_len: usize,
    /// `1000 * source / target` of the last job, used to size the next one.
    last_comp_ratio: u64,

    fifo_in: Option<Fifo>,
    fifo_out: Fifo,

    cmd: Box<CommandBlock>,
    ddl_in: DdeList,
    ddl_out: DdeList,
}

impl Inflate {
    /// Create a decompression stream on `device`. `wrap` may be
    /// [`Wrap::Auto`] to distinguish gzip from zlib on the first byte.
    pub fn new(device: &Arc<Device>, wrap: Wrap) -> Result<Inflate, Error> {
        Inflate::new_with_config(device, wrap, Config::default())
    }

    /// Like [`new`](Inflate::new) with explicit tunables.
    pub fn new_with_config(
        device: &Arc<Device>,
        wrap: Wrap,
        cfg: Config,
    ) -> Result<Inflate, Error> {
        device.count(cfg.stats, |s| s.inflate_init += 1);

        let mut fifo_out = Fifo::new((HIS_LEN * 8).max(2 * HIS_LEN + cfg.inf_buf_size as usize));
        fifo_out.cur = HIS_LEN; // history gap

        let mut s = Inflate {
            dev: device.clone(),
            cfg,
            wrap,
            active: wrap,
            state: InfState::Header,
            total_in: 0,
            total_out: 0,
            adler: INIT_ADLER,
            crc: INIT_CRC,
            ckbuf: [0; 128],
            ckidx: 0,
            cksum: INIT_CRC,
            hcrc16: 0,
            gzflags: 0,
            zlib_cmf: 0,
            inf_held: 0,
            length: 0,
            gzhead: None,
            gzhead_done: false,
            dict: Vec::new(),
            dict_id: 0,
            dict_armed: false,
            resuming: false,
            history_len: 0,
            is_final: false,
            trailer: [0; 8],
            trailer_len: 0,
            last_comp_ratio: 1000,
            fifo_in: None,
            fifo_out,
            cmd: CommandBlock::new_boxed(),
            ddl_in: DdeList::new(5),
            ddl_out: DdeList::new(4),
        };
        s.arm_initial_state();
        Ok(s)
    }

    fn arm_initial_state(&mut self) {
        self.state = match self.wrap {
            Wrap::Raw => InfState::Body,
            _ => InfState::Header,
        };
        self.active = self.wrap;
    }

    /// Total bytes of input consumed so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total bytes of output produced so far.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// The gzip header of this stream, once it has been fully parsed.
    pub fn header(&self) -> Option<&GzHeader> {
        if self.gzhead_done {
            self.gzhead.as_ref()
        } else {
            None
        }
    }

    /// Reset for a new stream, keeping allocations and the framing choice.
    pub fn reset(&mut self) {
        self.reset_keep();
        self.total_in = 0;
        self.total_out = 0;
    }

    /// Like [`reset`](Inflate::reset) but the running totals survive.
    pub fn reset_keep(&mut self) {
        self.adler = INIT_ADLER;
        self.crc = INIT_CRC;
        self.ckidx = 0;
        self.cksum = INIT_CRC;
        self.hcrc16 = 0;
        self.gzflags = 0;
        self.zlib_cmf = 0;
        self.inf_held = 0;
        self.length = 0;
        self.gzhead = None;
        self.gzhead_done = false;
        self.dict_armed = false;
        self.resuming = false;
        self.history_len = 0;
        self.is_final = false;
        self.trailer_len = 0;
        self.last_comp_ratio = 1000;
        if let Some(f) = &mut self.fifo_in {
            f.reset();
        }
        self.fifo_out.reset();
        self.fifo_out.cur = HIS_LEN;
        self.arm_initial_state();
    }

    /// Change the expected framing and reset.
    pub fn reset_wrap(&mut self, wrap: Wrap) {
        self.wrap = wrap;
        self.reset();
    }

    /// Install the preset dictionary a zlib stream asked for (after
    /// [`Error::NeedDict`]), or prime a raw stream's window.
    pub fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<(), Error> {
        match self.active {
            Wrap::Gzip => return Err(Error::Stream("gzip format does not permit a dictionary")),
            Wrap::Zlib | Wrap::Auto => {
                if self.state != InfState::ZlibDict {
                    return Err(Error::Stream("inflate did not ask for a dictionary"));
                }
                if adler32(INIT_ADLER, dictionary) != self.dict_id {
                    return Err(Error::Data("dictionary does not match the stream id"));
                }
            }
            Wrap::Raw => {
                if self.resuming {
                    return Err(Error::Stream("dictionary must precede the stream body"));
                }
            }
        }
        self.dict.clear();
        self.dict.extend_from_slice(dictionary);
        self.dict_armed = true;
        Ok(())
    }

    fn used_in(&self) -> usize {
        self.fifo_in.as_ref().map(|f| f.used).unwrap_or(0)
    }

    /// Decompress from `input` into `output`.
    ///
    /// Returns [`Status::StreamEnd`] once the trailer has been received and
    /// verified; [`Error::NeedDict`] asks the caller to install a preset
    /// dictionary and call again.
    pub fn inflate(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        flush: FlushDecompress,
    ) -> Result<Status, Error> {
        if self.state == InfState::Failed {
            return Err(Error::Stream("stream is in an error state"));
        }
        self.dev.count(self.cfg.stats, |s| {
            s.inflate += 1;
            s.inflate_bytes += input.len() as u64;
        });

        let mut io = Io {
            input,
            in_pos: 0,
            output,
            out_pos: 0,
        };

        match self.run(&mut io, flush) {
            Ok(st) => Ok(st),
            Err(Error::NeedDict(id)) => Err(Error::NeedDict(id)),
            Err(e) => {
                self.state = InfState::Failed;
                Err(e)
            }
        }
    }

    /// Like [`inflate`](Inflate::inflate) but appends to the spare capacity
    /// of `output`.
    pub fn inflate_vec(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        flush: FlushDecompress,
    ) -> Result<Status, Error> {
        let len = output.len();
        let cap = output.capacity();
        output.resize(cap, 0);
        let before = self.total_out;
        let ret = self.inflate(input, &mut output[len..], flush);
        output.truncate(len + (self.total_out - before) as usize);
        ret
    }

    /// One header byte, also fed into the running header checksum.
    fn get_hdr_byte(&mut self, io: &mut Io) -> Option<u8> {
        if io.avail_in() == 0 {
            return None;
        }
        let b = io.input[io.in_pos];
        io.in_pos += 1;
        self.total_in += 1;
        self.ckbuf[self.ckidx] = b;
        self.ckidx += 1;
        if self.ckidx == self.ckbuf.len() {
            // near full; fold into the running checksum
            self.cksum = crc32(self.cksum, &self.ckbuf);
            self.ckidx = 0;
        }
        Some(b)
    }

    fn run(&mut self, io: &mut Io, flush: FlushDecompress) -> Result<Status, Error> {
        trace!(
            state = ?self.state,
            avail_in = io.avail_in(),
            avail_out = io.avail_out(),
            "inflate call"
        );

        loop {
            match self.state {
                InfState::Header => match self.wrap {
                    Wrap::Auto => {
                        let c = match self.get_hdr_byte(io) {
                            Some(c) => c,
                            None => return Ok(Status::Ok),
                        };
                        if c == 0x1f {
                            self.active = Wrap::Gzip;
                            self.gzhead = Some(GzHeader::default());
                            self.state = InfState::GzipId2;
                        } else if (c & 0x0f) == 0x08 && (c >> 4) < 8 {
                            self.active = Wrap::Zlib;
                            self.zlib_cmf = c;
                            self.state = InfState::ZlibFlg;
                        } else {
                            return self.data_error("incorrect header");
                        }
                    }
                    Wrap::Gzip => {
                        self.active = Wrap::Gzip;
                        self.gzhead = Some(GzHeader::default());
                        self.state = InfState::GzipId1;
                    }
                    Wrap::Zlib => {
                        self.active = Wrap::Zlib;
                        self.state = InfState::ZlibId1;
                    }
                    Wrap::Raw => {
                        self.state = InfState::Body;
                    }
                },

                InfState::GzipId1 => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if c != 0x1f {
                        return self.data_error("incorrect gzip header");
                    }
                    self.state = InfState::GzipId2;
                }
                InfState::GzipId2 => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if c != 0x8b {
                        return self.data_error("incorrect gzip header");
                    }
                    self.state = InfState::GzipCm;
                }
                InfState::GzipCm => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if c != 0x08 {
                        return self.data_error("unknown compression method");
                    }
                    self.state = InfState::GzipFlg;
                }
                InfState::GzipFlg => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    self.gzflags = c;
                    if (c & gz::FRESERVED) != 0 {
                        return self.data_error("unknown header flags set");
                    }
                    if let Some(h) = &mut self.gzhead {
                        h.text = (c & gz::FTEXT) != 0;
                        h.hcrc = (c & gz::FHCRC) != 0;
                        h.mtime = 0;
                    }
                    self.inf_held = 0;
                    self.state = InfState::GzipMtime;
                }
                InfState::GzipMtime => {
                    while self.inf_held < 4 {
                        let c = match self.get_hdr_byte(io) {
                            Some(c) => c,
                            None => return Ok(Status::Ok),
                        };
                        if let Some(h) = &mut self.gzhead {
                            h.mtime |= u32::from(c) << (8 * self.inf_held);
                        }
                        self.inf_held += 1;
                    }
                    self.inf_held = 0;
                    self.state = InfState::GzipXfl;
                }
                InfState::GzipXfl => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if let Some(h) = &mut self.gzhead {
                        h.xflags = c;
                    }
                    self.state = InfState::GzipOs;
                }
                InfState::GzipOs => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if let Some(h) = &mut self.gzhead {
                        h.operating_system = c;
                    }
                    self.inf_held = 0;
                    self.length = 0;
                    self.state = InfState::GzipXlen;
                }
                InfState::GzipXlen => {
                    if self.gzflags & gz::FEXTRA != 0 {
                        while self.inf_held < 2 {
                            let c = match self.get_hdr_byte(io) {
                                Some(c) => c,
                                None => return Ok(Status::Ok),
                            };
                            self.length |= usize::from(c) << (8 * self.inf_held);
                            self.inf_held += 1;
                        }
                        if let Some(h) = &mut self.gzhead {
                            h.extra = Some(Vec::with_capacity(self.length));
                        }
                    }
                    self.inf_held = 0;
                    self.state = InfState::GzipExtra;
                }
                InfState::GzipExtra => {
                    if self.gzflags & gz::FEXTRA != 0 {
                        while self.length > 0 {
                            let c = match self.get_hdr_byte(io) {
                                Some(c) => c,
                                None => return Ok(Status::Ok),
                            };
                            if let Some(h) = &mut self.gzhead {
                                if let Some(extra) = &mut h.extra {
                                    extra.push(c);
                                }
                            }
                            self.length -= 1;
                        }
                    }
                    self.length = 0;
                    self.state = InfState::GzipName;
                }
                InfState::GzipName => {
                    if self.gzflags & gz::FNAME != 0 {
                        if let Some(h) = &mut self.gzhead {
                            if h.filename.is_none() {
                                h.filename = Some(Vec::new());
                            }
                        }
                        loop {
                            let c = match self.get_hdr_byte(io) {
                                Some(c) => c,
                                None => return Ok(Status::Ok),
                            };
                            if c == 0 {
                                break;
                            }
                            if let Some(h) = &mut self.gzhead {
                                if let Some(name) = &mut h.filename {
                                    name.push(c);
                                }
                            }
                        }
                    }
                    self.state = InfState::GzipComment;
                }
                InfState::GzipComment => {
                    if self.gzflags & gz::FCOMMENT != 0 {
                        if let Some(h) = &mut self.gzhead {
                            if h.comment.is_none() {
                                h.comment = Some(Vec::new());
                            }
                        }
                        loop {
                            let c = match self.get_hdr_byte(io) {
                                Some(c) => c,
                                None => return Ok(Status::Ok),
                            };
                            if c == 0 {
                                break;
                            }
                            if let Some(h) = &mut self.gzhead {
                                if let Some(comment) = &mut h.comment {
                                    comment.push(c);
                                }
                            }
                        }
                    }
                    self.inf_held = 0;
                    self.state = InfState::GzipHcrc;
                }
                InfState::GzipHcrc => {
                    if self.gzflags & gz::FHCRC != 0 {
                        if self.inf_held == 0 {
                            // close out the running header checksum before
                            // consuming the stored one
                            self.cksum = crc32(self.cksum, &self.ckbuf[..self.ckidx]);
                            self.ckidx = 0;
                        }
                        while self.inf_held < 2 {
                            if io.avail_in() == 0 {
                                return Ok(Status::Ok);
                            }
                            let c = io.input[io.in_pos];
                            io.in_pos += 1;
                            self.total_in += 1;
                            // stored low byte first
                            self.hcrc16 |= u16::from(c) << (8 * self.inf_held);
                            self.inf_held += 1;
                        }
                        if self.hcrc16 != (self.cksum & 0xffff) as u16 {
                            return self.data_error("header crc mismatch");
                        }
                    }
                    self.inf_held = 0;
                    self.crc = INIT_CRC;
                    self.gzhead_done = true;
                    self.state = InfState::Body;
                }

                InfState::ZlibId1 => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if (c & 0x0f) != 0x08 {
                        return self.data_error("unknown compression method");
                    }
                    if (c >> 4) >= 8 {
                        return self.data_error("invalid window size");
                    }
                    self.zlib_cmf = c;
                    self.state = InfState::ZlibFlg;
                }
                InfState::ZlibFlg => {
                    let c = match self.get_hdr_byte(io) {
                        Some(c) => c,
                        None => return Ok(Status::Ok),
                    };
                    if (u32::from(self.zlib_cmf) * 256 + u32::from(c)) % 31 != 0 {
                        return self.data_error("incorrect header check");
                    }
                    self.inf_held = 0;
                    if c & (1 << 5) != 0 {
                        self.dict_id = 0;
                        self.state = InfState::ZlibDictId;
                    } else {
                        self.adler = INIT_ADLER;
                        self.state = InfState::Body;
                    }
                }
                InfState::ZlibDictId => {
                    while self.inf_held < 4 {
                        let c = match self.get_hdr_byte(io) {
                            Some(c) => c,
                            None => return Ok(Status::Ok),
                        };
                        self.dict_id = (self.dict_id << 8) | u32::from(c);
                        self.inf_held += 1;
                    }
                    debug!(dict_id = self.dict_id, "stream requests a dictionary");
                    self.inf_held = 0;
                    self.state = InfState::ZlibDict;
                }
                InfState::ZlibDict => {
                    if !self.dict_armed {
                        return Err(Error::NeedDict(self.dict_id));
                    }
                    self.adler = INIT_ADLER;
                    self.state = InfState::Body;
                }

                InfState::Body => return self.body(io, flush),
                InfState::Failed => return Err(Error::Stream("stream is in an error state")),
            }
        }
    }

    fn data_error(&mut self, msg: &'static str) -> Result<Status, Error> {
        warn!(msg, "inflate data error");
        self.state = InfState::Failed;
        Err(Error::Data(msg))
    }

    /// The decompression loop proper.
    fn body(&mut self, io: &mut Io, flush: FlushDecompress) -> Result<Status, Error> {
        if self.is_final && self.fifo_out.used == 0 {
            // back from an output-starved call; only the trailer is left
            return self.verify_trailer(io, flush, true);
        }
        if flush == FlushDecompress::Finish
            && io.avail_in() == 0
            && self.used_in() == 0
            && self.fifo_out.used == 0
        {
            return Ok(Status::BufError);
        }

        let mut loop_cnt: u32 = 0;
        loop {
            loop_cnt += 1;
            if loop_cnt > 0xffff {
                warn!("inflate cannot make progress");
                return Err(Error::Stream("inflate made no progress"));
            }

            // deliver buffered output first, keeping the trailing window
            if self.fifo_out.used > 0 {
                let n = self.fifo_out.used.min(io.avail_out());
                if n > 0 {
                    io.output[io.out_pos..io.out_pos + n].copy_from_slice(
                        &self.fifo_out.buf[self.fifo_out.cur..self.fifo_out.cur + n],
                    );
                    io.out_pos += n;
                    self.total_out += n as u64;
                    self.fifo_out.consume(n);
                    self.fifo_out.compact_keep_history(HIS_LEN);
                }
                if self.fifo_out.used > 0 && io.avail_out() == 0 {
                    return Ok(Status::Ok); // need more space to write to
                }
                if self.is_final {
                    return self.verify_trailer(io, flush, true);
                }
            }

            if io.avail_out() == 0 || (io.avail_in() == 0 && self.used_in() == 0) {
                return Ok(Status::Ok);
            }

            // stage small inputs so jobs amortize their setup
            if io.avail_in() < self.cfg.soft_copy_threshold as usize {
                if self.fifo_in.is_none() {
                    self.fifo_in = Some(Fifo::new(self.cfg.inflate_fifo_in_len()));
                }
                let f = self.fifo_in.as_mut().unwrap();
                if f.used == 0 {
                    f.cur = 0;
                }
                f.compact();
                let n = f.push(&io.input[io.in_pos..], f.free_all());
                io.in_pos += n;
                self.total_in += n as u64;
            }

            match self.decompress_job(io)? {
                Some(status) => return Ok(status),
                None => {
                    if io.avail_in() > 0 && io.avail_out() > 0 {
                        continue;
                    }
                    if self.is_final || self.fifo_out.used > 0 {
                        continue;
                    }
                    return Ok(Status::Ok);
                }
            }
        }
    }

    /// Issue one decompress job and fold its results into the stream.
    /// `Ok(None)` means the loop should continue.
    fn decompress_job(&mut self, io: &mut Io) -> Result<Option<Status>, Error> {
        self.ddl_in.clear();
        self.ddl_out.clear();
        let map_dde = |_| Error::Stream("descriptor list overflow");

        if self.resuming {
            // the checksums of the previous job seed the next
            self.cmd.cpb.in_crc = self.cmd.cpb.out_crc;
            self.cmd.cpb.in_adler = self.cmd.cpb.out_adler;
        } else {
            self.cmd.cpb.in_subc = 0;
            self.cmd.cpb.in_sfbt = 0;
            self.cmd.cpb.in_rembytecnt = 0;
            self.cmd.cpb.in_crc = INIT_CRC;
            self.cmd.cpb.in_adler = INIT_ADLER;
            self.cmd.cpb.out_crc = INIT_CRC;
            self.cmd.cpb.out_adler = INIT_ADLER;
            self.last_comp_ratio = 1000;
            self.history_len = 0;

            if self.dict_armed {
                // prime the window with the dictionary tail
                let h = self.dict.len().min(HIS_LEN);
                let cur = self.fifo_out.cur;
                self.fifo_out.buf[cur - h..cur]
                    .copy_from_slice(&self.dict[self.dict.len() - h..]);
                self.history_len = h;
                self.dict_armed = false;
            }
        }

        let fc = if self.resuming || self.history_len > 0 {
            FunctionCode::DecompressResume
        } else {
            FunctionCode::Decompress
        };
        self.cmd.set_fc(fc);

        // round the history up to quadwords; the gap bytes are dead weight
        // the engine skips over
        self.history_len = (self.history_len + 15) / 16 * 16;
        self.cmd.cpb.set_histlen_bytes(self.history_len as u32);
        if self.history_len > 0 {
            debug_assert!(self.fifo_out.cur >= self.history_len);
            let from = self.fifo_out.cur - self.history_len;
            self.ddl_in
                .append(self.fifo_out.buf[from..].as_ptr(), self.history_len)
                .map_err(map_dde)?;
        }

        if let Some(f) = &self.fifo_in {
            self.ddl_in.append(f.data().as_ptr(), f.used).map_err(map_dde)?;
        }
        self.ddl_in
            .append(io.input[io.in_pos..].as_ptr(), io.avail_in())
            .map_err(map_dde)?;

        let len_next_out = io.avail_out();
        self.ddl_out
            .append(io.output[io.out_pos..].as_mut_ptr(), len_next_out)
            .map_err(map_dde)?;
        let at = self.fifo_out.cur + self.fifo_out.used;
        let free = self.fifo_out.len() - at;
        self.ddl_out
            .append(self.fifo_out.buf[at..].as_mut_ptr(), free)
            .map_err(map_dde)?;
        let target_sz = len_next_out + free;

        // size the job: desired output is the user buffer plus a window's
        // worth of slack; the ratio heuristic picks the matching input
        let target_expected =
            (len_next_out + HIS_LEN + HIS_LEN / 4).min(64 * self.cfg.per_job_len as usize);
        let source_expected =
            ((target_expected as u64 * self.last_comp_ratio + 1000) / 1000) as usize;

        let total_in_ddl = self.ddl_in.total() as usize;
        debug_assert!(total_in_ddl > self.history_len);
        let mut source_sz =
            (total_in_ddl - self.history_len).min(source_expected) + self.history_len;

        let mut pgfault_retries = self.cfg.pgfault_retries;
        let spbc: usize;
        let tpbc: usize;
        let mut final_seen = false;
        loop {
            self.ddl_in.set_total(source_sz as u32);
            crate::ddl::touch_pages(
                &*self.cmd as *const CommandBlock as *const u8,
                std::mem::size_of::<CommandBlock>(),
                self.cfg.page_size,
                false,
            );
            let _ = self.ddl_in.touch_pages(source_sz, self.cfg.page_size, false);
            let _ = self.ddl_out.touch_pages(target_sz, self.cfg.page_size, true);

            let cc = submit_job(&self.dev, &self.ddl_in, &self.ddl_out, &mut self.cmd, &self.cfg)
                .map_err(|_| Error::Errno("job submission failed"))?;

            match cc {
                CompCode::Translation => {
                    if pgfault_retries == self.cfg.pgfault_retries {
                        pgfault_retries -= 1;
                        continue;
                    }
                    if pgfault_retries == 0 {
                        warn!("too many page fault retries");
                        return Err(Error::Errno("cannot make progress past page faults"));
                    }
                    pgfault_retries -= 1;
                    if source_sz > self.cfg.page_size {
                        source_sz = (source_sz / 2).max(self.cfg.page_size);
                    }
                    continue;
                }
                CompCode::TargetSpace => {
                    // no results; retry with less input, at least one byte
                    // past the history
                    source_sz = (source_sz - self.history_len + 2) / 2 + self.history_len;
                    trace!(source_sz, "target space exhausted, retrying smaller");
                    continue;
                }
                CompCode::DataLength => {
                    let csb = &self.cmd.crb.csb;
                    if csb.ce_termination() || !csb.ce_partial_completion() {
                        return Err(Error::Data("history length error"));
                    }
                    let out_sfbt = self.cmd.cpb.out_sfbt;
                    let subc = usize::from(self.cmd.cpb.out_subc);
                    let raw_spbc = self.cmd.cpb.out_spbc_decomp as usize;
                    let t = self.cmd.crb.csb.tpbc as usize;
                    debug_assert!(target_sz >= t);
                    debug_assert!(raw_spbc >= self.history_len);
                    let mut src_used = raw_spbc - self.history_len;

                    match out_sfbt {
                        sfbt::FINAL_EOB => {
                            // trailing bits past the final EOB are not part
                            // of the stream
                            src_used -= subc / 8;
                            final_seen = true;
                        }
                        sfbt::STORED | sfbt::STORED_BFINAL => {
                            src_used -= (subc + 7) / 8;
                            self.cmd.cpb.in_subc = (subc % 8) as u16;
                            self.cmd.cpb.in_sfbt = out_sfbt;
                            self.cmd.cpb.in_rembytecnt = self.cmd.cpb.out_rembytecnt;
                        }
                        sfbt::FH | sfbt::FH_BFINAL => {
                            src_used -= (subc + 7) / 8;
                            self.cmd.cpb.in_subc = (subc % 8) as u16;
                            self.cmd.cpb.in_sfbt = out_sfbt;
                        }
                        sfbt::DH | sfbt::DH_BFINAL => {
                            src_used -= (subc + 7) / 8;
                            self.cmd.cpb.in_subc = (subc % 8) as u16;
                            self.cmd.cpb.in_sfbt = out_sfbt;
                            // the partially decoded table must ride along,
                            // rounded to 128-bit units
                            let dhtlen = usize::from(self.cmd.cpb.out_dhtlen);
                            debug_assert!(dhtlen >= 42);
                            self.cmd.cpb.in_dhtlen = dhtlen as u16;
                            let qwords = (dhtlen + 127) / 128 * 16;
                            let dht = self.cmd.cpb.out_dht.0;
                            self.cmd.cpb.in_dht.0[..qwords].copy_from_slice(&dht[..qwords]);
                        }
                        _ => {
                            // block header boundary
                            src_used -= (subc + 7) / 8;
                            self.cmd.cpb.in_subc = (subc % 8) as u16;
                            self.cmd.cpb.in_sfbt = out_sfbt;
                        }
                    }
                    spbc = src_used;
                    tpbc = t;
                    break;
                }
                CompCode::Ok => {
                    // source fully consumed and the stream is complete
                    let raw_spbc = self.cmd.cpb.out_spbc_decomp as usize;
                    debug_assert!(raw_spbc >= self.history_len);
                    spbc = raw_spbc - self.history_len;
                    tpbc = self.cmd.crb.csb.tpbc as usize;
                    final_seen = true;
                    break;
                }
                CompCode::DataError => {
                    return Err(Error::Data("invalid compressed data"));
                }
                other => {
                    warn!(?other, "fatal completion code");
                    return Err(Error::Data("engine reported an unrecoverable error"));
                }
            }
        }

        // the final job keeps its tail in the caller's buffer instead of
        // copying it out as history
        if final_seen {
            self.is_final = true;
        }

        // input side: fifo_in first, then the caller's buffer
        let used_in = self.used_in();
        if spbc > used_in {
            if let Some(f) = &mut self.fifo_in {
                f.consume(f.used);
                f.cur = 0;
            }
            io.in_pos += spbc - used_in;
            self.total_in += (spbc - used_in) as u64;
        } else if let Some(f) = &mut self.fifo_in {
            f.consume(spbc);
            f.compact();
        }

        self.crc = self.cmd.cpb.out_crc;
        self.adler = self.cmd.cpb.out_adler;

        // output side: rebalance so the trailing window stays in fifo_out
        self.rebalance_output(io, len_next_out, tpbc);

        self.history_len = (self.total_out + self.fifo_out.used as u64).min(HIS_LEN as u64) as usize;
        self.last_comp_ratio = (1000 * (spbc as u64 + 1)) / (tpbc as u64 + 1);
        self.last_comp_ratio = self.last_comp_ratio.clamp(1, 1000);
        self.resuming = true;

        trace!(
            spbc,
            tpbc,
            final_seen,
            ratio = self.last_comp_ratio,
            "decompress job done"
        );

        if final_seen {
            self.is_final = true;
            // stash whatever trailer bytes already arrived
            self.copy_trailer_bytes(io);
            if self.fifo_out.used == 0 {
                return self
                    .verify_trailer(io, FlushDecompress::None, false)
                    .map(Some);
            }
            return Ok(None); // drain fifo_out first
        }
        Ok(None)
    }

    /// Split engine output between the caller's buffer and fifo_out so that
    /// the last 32 KiB stays addressable as the next job's history.
    fn rebalance_output(&mut self, io: &mut Io, len_next_out: usize, tpbc: usize) {
        let cur = self.fifo_out.cur;
        if tpbc <= len_next_out {
            // everything landed in the caller's buffer; copy the tail into
            // the history region
            if !self.is_final {
                let need = HIS_LEN.min(tpbc);
                let from = io.out_pos + tpbc - need;
                self.fifo_out.buf[cur..cur + need]
                    .copy_from_slice(&io.output[from..from + need]);
                self.fifo_out.cur += need;
                self.fifo_out.compact_keep_history(HIS_LEN);
            }
            io.out_pos += tpbc;
            self.total_out += tpbc as u64;
            return;
        }

        let overflow = tpbc - len_next_out;
        if overflow < HIS_LEN {
            // history spans the caller's buffer and fifo_out; stitch it
            // together in front of the overflow bytes
            if len_next_out + overflow > HIS_LEN {
                let len = HIS_LEN - overflow;
                let from = io.out_pos + len_next_out - len;
                self.fifo_out.buf[cur - len..cur].copy_from_slice(&io.output[from..from + len]);
            } else {
                let len = HIS_LEN - (len_next_out + overflow);
                self.fifo_out
                    .buf
                    .copy_within(cur - len..cur, cur - len_next_out - len);
                self.fifo_out.buf[cur - len_next_out..cur]
                    .copy_from_slice(&io.output[io.out_pos..io.out_pos + len_next_out]);
            }
            self.fifo_out.used += overflow;
        } else {
            self.fifo_out.used += overflow;
        }
        io.out_pos += len_next_out;
        self.total_out += len_next_out as u64;
    }

    /// Pull trailer bytes (which may span fifo_in and the caller's buffer,
    /// and may arrive across calls) into the scratch.
    fn copy_trailer_bytes(&mut self, io: &mut Io) {
        let need_total = match self.active {
            Wrap::Gzip => 8,
            Wrap::Zlib => 4,
            _ => 0,
        };
        let mut need = need_total - self.trailer_len;

        if need > 0 {
            if let Some(f) = &mut self.fifo_in {
                let got = f.used.min(need);
                if got > 0 {
                    self.trailer[self.trailer_len..self.trailer_len + got]
                        .copy_from_slice(&f.data()[..got]);
                    self.trailer_len += got;
                    need -= got;
                    f.consume(got);
                    f.compact();
                }
            }
        }
        if need > 0 {
            let got = io.avail_in().min(need);
            if got > 0 {
                self.trailer[self.trailer_len..self.trailer_len + got]
                    .copy_from_slice(&io.input[io.in_pos..io.in_pos + got]);
                self.trailer_len += got;
                io.in_pos += got;
                self.total_in += got as u64;
            }
        }
    }

    /// Verify the stream trailer once all output has been delivered.
    fn verify_trailer(
        &mut self,
        io: &mut Io,
        flush: FlushDecompress,
        copy_first: bool,
    ) -> Result<Status, Error> {
        if copy_first {
            self.copy_trailer_bytes(io);
        }

        match self.active {
            Wrap::Gzip => {
                if self.trailer_len < 8 {
                    return self.trailer_starved(io, flush);
                }
                let t = &self.trailer;
                let stored_crc = u32::from_le_bytes([t[0], t[1], t[2], t[3]]);
                let stored_isize = u32::from_le_bytes([t[4], t[5], t[6], t[7]]);
                trace!(
                    computed = self.crc,
                    stored = stored_crc,
                    "gzip trailer check"
                );
                if stored_crc == self.crc && stored_isize == self.total_out as u32 {
                    Ok(Status::StreamEnd)
                } else {
                    self.data_error("incorrect data check")
                }
            }
            Wrap::Zlib => {
                if self.trailer_len < 4 {
                    return self.trailer_starved(io, flush);
                }
                let t = &self.trailer;
                let stored = u32::from_be_bytes([t[0], t[1], t[2], t[3]]);
                trace!(computed = self.adler, stored, "zlib trailer check");
                if stored == self.adler {
                    Ok(Status::StreamEnd)
                } else {
                    self.data_error("incorrect data check")
                }
            }
            _ => Ok(Status::StreamEnd),
        }
    }

    fn trailer_starved(&mut self, io: &Io, flush: FlushDecompress) -> Result<Status, Error> {
        if flush == FlushDecompress::Finish && io.avail_in() == 0 {
            // caller claims there is no more input, so the trailer can
            // never complete
            return Ok(Status::BufError);
        }
        Ok(Status::Ok)
    }
}

impl Drop for Inflate {
    fn drop(&mut self) {
        self.dev.count(self.cfg.stats, |s| s.inflate_end += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "software")]
    fn device() -> Arc<Device> {
        Device::software()
    }

    #[cfg(feature = "software")]
    #[test]
    fn rejects_garbage_header() {
        let dev = device();
        let mut inf = Inflate::new(&dev, Wrap::Auto).unwrap();
        let mut out = [0u8; 64];
        let err = inf
            .inflate(&[0x42, 0x42, 0x42], &mut out, FlushDecompress::None)
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        // permanently failed
        let err = inf.inflate(&[], &mut out, FlushDecompress::None).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[cfg(feature = "software")]
    #[test]
    fn gzip_header_is_parsed_byte_by_byte() {
        let dev = device();
        let mut inf = Inflate::new(&dev, Wrap::Gzip).unwrap();
        let header = GzHeader::new()
            .set_filename("file.txt")
            .set_comment("hi")
            .set_extra(vec![9, 9])
            .set_mtime(123456)
            .to_bytes();
        let mut out = [0u8; 16];
        for &b in &header {
            let st = inf.inflate(&[b], &mut out, FlushDecompress::None).unwrap();
            assert_eq!(st, Status::Ok);
        }
        let h = inf.header().expect("header complete");
        assert_eq!(h.filename(), Some(&b"file.txt"[..]));
        assert_eq!(h.comment(), Some(&b"hi"[..]));
        assert_eq!(h.extra(), Some(&b"\x09\x09"[..]));
        assert_eq!(h.mtime(), 123456);
        assert_eq!(inf.total_in(), header.len() as u64);
    }

    #[cfg(feature = "software")]
    #[test]
    fn gzip_header_crc_is_checked() {
        let dev = device();
        let mut inf = Inflate::new(&dev, Wrap::Gzip).unwrap();
        let mut header = GzHeader::new().set_hcrc(true).set_filename("x").to_bytes();
        let n = header.len();
        header[n - 1] ^= 0xff; // corrupt the stored CRC16
        let mut out = [0u8; 16];
        let err = inf
            .inflate(&header, &mut out, FlushDecompress::None)
            .unwrap_err();
        assert!(matches!(err, Error::Data("header crc mismatch")));
    }

    #[cfg(feature = "software")]
    #[test]
    fn zlib_header_check_bytes() {
        let dev = device();
        // 0x78 0x9c is the canonical zlib header
        let mut inf = Inflate::new(&dev, Wrap::Zlib).unwrap();
        let mut out = [0u8; 16];
        assert_eq!(
            inf.inflate(&[0x78, 0x9c], &mut out, FlushDecompress::None).unwrap(),
            Status::Ok
        );

        let mut bad = Inflate::new(&dev, Wrap::Zlib).unwrap();
        let err = bad
            .inflate(&[0x78, 0x9d], &mut out, FlushDecompress::None)
            .unwrap_err();
        assert!(matches!(err, Error::Data("incorrect header check")));
    }

    #[cfg(feature = "software")]
    #[test]
    fn auto_detect_picks_gzip_and_zlib() {
        let dev = device();
        let mut out = [0u8; 16];

        let mut inf = Inflate::new(&dev, Wrap::Auto).unwrap();
        inf.inflate(&[0x1f], &mut out, FlushDecompress::None).unwrap();
        assert_eq!(inf.active, Wrap::Gzip);

        let mut inf = Inflate::new(&dev, Wrap::Auto).unwrap();
        inf.inflate(&[0x78], &mut out, FlushDecompress::None).unwrap();
        assert_eq!(inf.active, Wrap::Zlib);
    }

    #[cfg(feature = "software")]
    #[test]
    fn need_dict_is_reported_with_the_id() {
        let dev = device();
        let dict = b"0123456789abcdef0123456789abcdef";
        let dict_id = adler32(INIT_ADLER, dict);

        // hand-build a zlib header with FDICT set
        let mut cmf_flg = (0x78u16 << 8) | 0x20;
        cmf_flg += 31 - (cmf_flg % 31);
        let mut stream = vec![(cmf_flg >> 8) as u8, cmf_flg as u8];
        stream.extend_from_slice(&dict_id.to_be_bytes());

        let mut inf = Inflate::new(&dev, Wrap::Zlib).unwrap();
        let mut out = [0u8; 16];
        let err = inf
            .inflate(&stream, &mut out, FlushDecompress::None)
            .unwrap_err();
        match err {
            Error::NeedDict(id) => assert_eq!(id, dict_id),
            other => panic!("unexpected error: {:?}", other),
        }

        // wrong dictionary is rejected, right one accepted
        assert!(inf.set_dictionary(b"wrong").is_err());
        inf.set_dictionary(dict).unwrap();
    }

    #[cfg(feature = "software")]
    #[test]
    fn reset_keep_preserves_totals() {
        let dev = device();
        let data = b"totals survive this";

        let mut d = crate::Deflate::new(&dev, crate::Compression::default(), Wrap::Zlib).unwrap();
        let mut compressed = vec![0u8; 4096];
        d.deflate(data, &mut compressed, crate::FlushCompress::Finish)
            .unwrap();
        let compressed = &compressed[..d.total_out() as usize];

        let mut inf = Inflate::new(&dev, Wrap::Zlib).unwrap();
        let mut out = vec![0u8; 4096];
        let status = inf
            .inflate(compressed, &mut out, FlushDecompress::Finish)
            .unwrap();
        assert_eq!(status, Status::StreamEnd);
        let (in_before, out_before) = (inf.total_in(), inf.total_out());
        assert_eq!(in_before as usize, compressed.len());
        assert_eq!(out_before as usize, data.len());

        inf.reset_keep();
        assert_eq!(inf.total_in(), in_before);
        assert_eq!(inf.total_out(), out_before);
        assert_eq!(inf.state, InfState::Header);

        // a second stream decodes and the totals keep accumulating
        let status = inf
            .inflate(compressed, &mut out, FlushDecompress::Finish)
            .unwrap();
        assert_eq!(status, Status::StreamEnd);
        assert_eq!(inf.total_in(), 2 * in_before);
        assert_eq!(inf.total_out(), 2 * out_before);

        // plain reset clears them
        inf.reset();
        assert_eq!(inf.total_in(), 0);
        assert_eq!(inf.total_out(), 0);
    }

    #[cfg(feature = "software")]
    #[test]
    fn reset_is_idempotent() {
        let dev = device();
        let mut inf = Inflate::new(&dev, Wrap::Gzip).unwrap();
        let mut out = [0u8; 16];
        let _ = inf.inflate(&[0x1f, 0x8b], &mut out, FlushDecompress::None);
        inf.reset();
        let snapshot = (inf.total_in(), inf.total_out(), inf.state);
        inf.reset();
        assert_eq!(snapshot, (inf.total_in(), inf.total_out(), inf.state));
        assert_eq!(inf.fifo_out.cur, HIS_LEN);
    }
}
