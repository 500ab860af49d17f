//! Streaming DEFLATE compression through the accelerator.
//!
//! The engine emits one deflate block per job and can only start a block on
//! a byte boundary, so everything here revolves around feeding it bounded
//! chunks and stitching the blocks together: sync flushes to realign after
//! a block ends mid-byte, stored-block fallback when a block expands, and a
//! pair of staging fifos so the caller's buffers can be any size.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::checksum::{adler32, adler32_combine, crc32_combine, INIT_ADLER, INIT_CRC};
use crate::cmd::{CommandBlock, FunctionCode};
use crate::config::{Config, Strategy};
use crate::ddl::DdeList;
use crate::device::Device;
use crate::dht::{DhtCache, DhtLookup, DhtRequest};
use crate::error::{CompCode, Error, NxStatus};
use crate::fifo::Fifo;
use crate::gz::GzHeader;
use crate::submit::submit_job;
use crate::{Compression, FlushCompress, Status, Wrap};

/// Largest dynamic Huffman table in a block header; part of the worst-case
/// output bound.
const MAX_DHT_LEN: u64 = 288;
/// Dictionary tail handed to the engine as history.
const MAX_DICT_LEN: usize = (1 << 15) - 272;
/// Below this, a dictionary-primed block does better with fixed Huffman.
const DICT_THRESHOLD: usize = 1 << 8;
/// Input floor when shrinking jobs on fault retries.
const MIN_INPUT_LEN: u32 = 1 << 16;
const MAX_EXPANSION_LEN: u32 = 2 * MIN_INPUT_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeflateState {
    /// Header not yet written.
    Init,
    Deflating,
    /// The final block's BFINAL bit is out; only the trailer remains.
    BFinal,
    /// Trailer written; stream complete.
    Trailer,
    /// Permanently failed.
    Failed,
}

/// The caller's buffers for one call.
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

    fn next_in(&self) -> &[u8] {
        &self.input[self.in_pos..]
    }
}

/// Raw in-memory compression stream.
///
/// This type is the building block for anything that produces deflate,
/// zlib, or gzip data through the accelerator. The caller owns both
/// buffers: each [`deflate`](Deflate::deflate) call consumes some amount of
/// `input` and produces some amount of `output`; progress is visible
/// through [`total_in`](Deflate::total_in) and
/// [`total_out`](Deflate::total_out).
pub struct Deflate {
    dev: Arc<Device>,
    cfg: Config,
    level: Compression,
    strategy: Strategy,
    wrap: Wrap,

    state: DeflateState,
    flush: FlushCompress,
    total_in: u64,
    total_out: u64,
    adler: u32,
    crc: u32,
    /// Valid bits in the last output byte of the most recent job.
    tebc: u8,
    /// Bytes still owed to the stored-block fallback after an expansion.
    need_stored_block: i64,
    invoke_cnt: u64,
    /// Last job's source/target processed byte counts (history excluded).
    spbc: u32,
    tpbc: u32,

    fifo_in: Option<Fifo>,
    fifo_out: Fifo,

    dict: Vec<u8>,
    dict_id: u32,
    /// Dictionary armed as the next block's history.
    dict_pending: bool,

    gzhead: Option<GzHeader>,
    dht: Option<DhtCache>,

    cmd: Box<CommandBlock>,
    ddl_in: DdeList,
    ddl_out: DdeList,
}

impl Deflate {
    /// Create a compression stream on `device`.
    ///
    /// `wrap` selects the framing; [`Wrap::Auto`] is meaningless for
    /// compression and rejected.
    pub fn new(device: &Arc<Device>, level: Compression, wrap: Wrap) -> Result<Deflate, Error> {
        Deflate::new_with_config(device, level, wrap, Config::default())
    }

    /// Like [`new`](Deflate::new) with explicit tunables.
    pub fn new_with_config(
        device: &Arc<Device>,
        level: Compression,
        wrap: Wrap,
        cfg: Config,
    ) -> Result<Deflate, Error> {
        if wrap == Wrap::Auto {
            return Err(Error::Stream("auto header detection is inflate-only"));
        }
        if level.level() > 9 {
            return Err(Error::Stream("compression level out of range"));
        }
        device.count(cfg.stats, |s| s.deflate_init += 1);

        let strategy = cfg.strategy;
        let fifo_out_len = cfg.deflate_fifo_out_len().max(MAX_EXPANSION_LEN as usize);
        let dht = match strategy {
            Strategy::Default => Some(DhtCache::new()),
            Strategy::Fixed => None,
        };

        Ok(Deflate {
            dev: device.clone(),
            cfg,
            level,
            strategy,
            wrap,
            state: DeflateState::Init,
            flush: FlushCompress::None,
            total_in: 0,
            total_out: 0,
            adler: INIT_ADLER,
            crc: INIT_CRC,
            tebc: 0,
            need_stored_block: 0,
            invoke_cnt: 0,
            spbc: 0,
            tpbc: 0,
            fifo_in: None,
            fifo_out: Fifo::new(fifo_out_len),
            dict: Vec::new(),
            dict_id: 0,
            dict_pending: false,
            gzhead: None,
            dht,
            cmd: CommandBlock::new_boxed(),
            ddl_in: DdeList::new(5),
            ddl_out: DdeList::new(4),
        })
    }

    /// Total bytes of input consumed so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total bytes of output produced so far.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Worst-case compressed size for `source_len` input bytes.
    pub fn bound(&self, source_len: u64) -> u64 {
        2 * source_len + MAX_DHT_LEN + 1
    }

    /// Install a gzip header to be emitted instead of the blank one.
    /// Only meaningful before the first [`deflate`](Deflate::deflate) call
    /// of a gzip stream.
    pub fn set_header(&mut self, header: GzHeader) -> Result<(), Error> {
        if self.wrap != Wrap::Gzip {
            return Err(Error::Stream("headers only apply to gzip streams"));
        }
        if self.state != DeflateState::Init {
            return Err(Error::Stream("header must be set before compressing"));
        }
        self.gzhead = Some(header);
        Ok(())
    }

    /// Install a preset dictionary and return its Adler-32 identifier.
    ///
    /// Zlib streams accept a dictionary only before the first call; raw
    /// streams also at any block boundary with drained buffers. Gzip has no
    /// dictionary concept.
    pub fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<u32, Error> {
        match self.wrap {
            Wrap::Gzip => return Err(Error::Stream("gzip format does not allow a dictionary")),
            Wrap::Zlib => {
                if self.state != DeflateState::Init {
                    return Err(Error::Stream("dictionary must precede the first deflate call"));
                }
            }
            Wrap::Raw => {
                if !matches!(self.state, DeflateState::Init | DeflateState::Deflating) {
                    return Err(Error::Stream("stream is past accepting a dictionary"));
                }
                let staged = self.fifo_in.as_ref().map(|f| f.used).unwrap_or(0);
                if self.fifo_out.used > 0 || staged > 0 {
                    return Err(Error::Stream("data must be consumed or flushed first"));
                }
            }
            Wrap::Auto => unreachable!(),
        }

        self.dict.clear();
        self.dict.extend_from_slice(dictionary);
        self.dict_id = adler32(INIT_ADLER, dictionary);
        self.dict_pending = true;
        Ok(self.dict_id)
    }

    /// Reset the stream for a new session, keeping allocations.
    pub fn reset(&mut self) {
        self.reset_keep();
        self.total_in = 0;
        self.total_out = 0;
    }

    /// Like [`reset`](Deflate::reset) but the running totals survive.
    pub fn reset_keep(&mut self) {
        self.state = DeflateState::Init;
        self.flush = FlushCompress::None;
        self.adler = INIT_ADLER;
        self.crc = INIT_CRC;
        self.tebc = 0;
        self.need_stored_block = 0;
        self.invoke_cnt = 0;
        self.spbc = 0;
        self.tpbc = 0;
        if let Some(f) = &mut self.fifo_in {
            f.reset();
        }
        self.fifo_out.reset();
        self.dict_pending = false;
        self.dict_id = 0;
    }

    /// Compress from `input` into `output`.
    ///
    /// Returns [`Status::Ok`] when more input or output room is needed,
    /// [`Status::BufError`] when no progress was possible, and
    /// [`Status::StreamEnd`] exactly once, after [`FlushCompress::Finish`]
    /// drained everything and the trailer is out.
    pub fn deflate(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        flush: FlushCompress,
    ) -> Result<Status, Error> {
        if self.state == DeflateState::Failed {
            return Err(Error::Stream("stream is in an error state"));
        }
        self.dev.count(self.cfg.stats, |s| {
            s.deflate += 1;
            s.deflate_bytes += input.len() as u64;
        });

        let mut io = Io {
            input,
            in_pos: 0,
            output,
            out_pos: 0,
        };
        self.flush = flush;

        match self.run(&mut io) {
            Ok(st) => Ok(st),
            Err(e) => {
                self.state = DeflateState::Failed;
                Err(e)
            }
        }
    }

    /// Like [`deflate`](Deflate::deflate) but appends to the spare capacity
    /// of `output`, growing its length by what was produced.
    pub fn deflate_vec(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        flush: FlushCompress,
    ) -> Result<Status, Error> {
        let len = output.len();
        let cap = output.capacity();
        output.resize(cap, 0);
        let before = self.total_out;
        let ret = self.deflate(input, &mut output[len..], flush);
        output.truncate(len + (self.total_out - before) as usize);
        ret
    }

    fn used_in(&self) -> usize {
        self.fifo_in.as_ref().map(|f| f.used).unwrap_or(0)
    }

    fn run(&mut self, io: &mut Io) -> Result<Status, Error> {
        trace!(
            flush = ?self.flush,
            state = ?self.state,
            avail_in = io.avail_in(),
            avail_out = io.avail_out(),
            "deflate call"
        );

        if io.avail_out() == 0 {
            return Ok(Status::BufError);
        }
        if self.state == DeflateState::Trailer && self.fifo_out.used == 0 {
            // stream already ended; nothing left to hand out
            return Ok(Status::BufError);
        }

        if self.fifo_out.used == 0 && io.avail_in() == 0 && self.used_in() == 0 {
            match self.flush {
                FlushCompress::None => return Ok(Status::BufError),
                FlushCompress::Partial | FlushCompress::Sync | FlushCompress::Full => {
                    return Ok(Status::Ok)
                }
                FlushCompress::Finish => {}
            }
        }

        if self.state == DeflateState::Init {
            self.add_header(io);
        }

        if self.state == DeflateState::BFinal && self.flush != FlushCompress::Finish {
            return Err(Error::Stream("stream finishing; flush must remain Finish"));
        }
        if self.state == DeflateState::BFinal && io.avail_in() != 0 {
            return Ok(Status::BufError);
        }

        let mut loop_cnt: u32 = 0;
        'outer: loop {
            loop_cnt += 1;
            if loop_cnt > 0xffff {
                warn!("deflate cannot make progress");
                return Err(Error::Stream("deflate made no progress"));
            }

            // s1: drain fifo_out into the caller's buffer first
            if self.fifo_out.used > 0 {
                self.copy_fifo_out_to_next_out(io);
                if !matches!(self.state, DeflateState::BFinal | DeflateState::Trailer) {
                    if io.avail_out() == 0 {
                        return Ok(Status::Ok);
                    }
                    if self.fifo_out.used == 0 && io.avail_in() == 0 && self.used_in() == 0 {
                        return Ok(Status::Ok);
                    }
                }
                if matches!(self.state, DeflateState::BFinal | DeflateState::Trailer)
                    && io.avail_out() == 0
                    && self.fifo_out.used > 0
                {
                    return Ok(Status::Ok);
                }
            }

            // end of input: finalize, write the trailer, report stream end
            if io.avail_in() == 0 && self.used_in() == 0 && self.fifo_out.used == 0 {
                if self.state == DeflateState::Deflating {
                    if self.flush != FlushCompress::Finish {
                        return Ok(Status::Ok);
                    }
                    debug!("closing the stream with a final empty block");
                    self.append_spanning_flush(io, FlushCompress::Sync, 0, true);
                    self.state = DeflateState::BFinal;
                }
                if self.state == DeflateState::BFinal {
                    self.append_trailer(io);
                    self.state = DeflateState::Trailer;
                }
                if self.fifo_out.used == 0
                    && (self.state == DeflateState::Trailer || self.flush == FlushCompress::Finish)
                {
                    return Ok(Status::StreamEnd);
                }
                if self.fifo_out.used > 0 {
                    continue 'outer;
                }
                return Ok(Status::Ok);
            }

            // s2: decide between staging small input and compressing
            if io.avail_out() > 0 && self.fifo_out.used > 0 {
                continue 'outer;
            }

            let want_compress = (self.used_in() + io.avail_in())
                > self.cfg.compress_threshold as usize
                || self.flush != FlushCompress::None
                || self.level.level() == 0
                || self.dict_pending;
            if !want_compress {
                if self.fifo_in.is_none() {
                    self.fifo_in = Some(Fifo::new(self.cfg.deflate_fifo_in_len()));
                }
                let fifo = self.fifo_in.as_mut().unwrap();
                fifo.compact();
                let n = fifo.push(io.next_in(), fifo.free_half());
                io.in_pos += n;
                self.total_in += n as u64;
                return Ok(Status::Ok);
            }

            // s3: one block
            if (self.level.level() == 0 && io.avail_out() > 0) || self.need_stored_block > 0 {
                self.stored_block(io)?;
                continue 'outer;
            }

            let fixed_block = self.strategy == Strategy::Fixed
                || (self.dict_pending && io.avail_in() < DICT_THRESHOLD);
            let rc = if fixed_block {
                self.compress_block(io, FunctionCode::CompressResumeFht)?
            } else {
                let req = if self.invoke_cnt == 0 {
                    DhtRequest::Default
                } else {
                    DhtRequest::Search
                };
                let looked = self
                    .dht
                    .as_mut()
                    .expect("default strategy always has a table cache")
                    .lookup(&mut self.cmd, req);
                self.dev.count(self.cfg.stats, |s| match looked {
                    DhtLookup::Hit => s.dht_hits += 1,
                    DhtLookup::Computed => s.dht_computed += 1,
                    DhtLookup::Builtin => {}
                });
                self.compress_block(io, FunctionCode::CompressResumeDhtCount)?
            };

            if rc == NxStatus::OkBigTarget {
                // compressed data expanded; redo this input as stored blocks
                debug!(spbc = self.spbc, "block expanded, falling back to stored");
                self.need_stored_block = i64::from(self.spbc);
                continue 'outer;
            }
            if matches!(rc, NxStatus::Ok | NxStatus::OkSuspend) {
                self.update_checksum_direct();
            }

            // route on what is left in the four buffers
            let state = (usize::from(io.avail_out() > 0) << 3)
                | (usize::from(self.fifo_out.used > 0) << 2)
                | (usize::from(io.avail_in() > 0) << 1)
                | usize::from(self.used_in() > 0);
            match state {
                0b0000 | 0b1000 => {
                    if self.flush == FlushCompress::Finish {
                        continue 'outer;
                    }
                    return Ok(Status::Ok);
                }
                0b0001..=0b0111 => return Ok(Status::Ok),
                _ => continue 'outer,
            }
        }
    }

    /// Emit the stream header on the first call.
    fn add_header(&mut self, io: &mut Io) {
        match self.wrap {
            Wrap::Zlib => {
                let mut header = (0x08u32 + ((15 - 8) << 4)) << 8;
                let level = self.level.level();
                let level_flags = if level < 2 {
                    0
                } else if level < 6 {
                    1
                } else if level == 6 {
                    2
                } else {
                    3
                };
                header |= level_flags << 6;
                if self.dict_pending {
                    header |= 0x20; // FDICT
                }
                header += 31 - (header % 31);

                self.put_byte(io, (header >> 8) as u8);
                self.put_byte(io, header as u8);
                if self.dict_pending {
                    for b in self.dict_id.to_be_bytes() {
                        self.put_byte(io, b);
                    }
                }
                self.adler = INIT_ADLER;
            }
            Wrap::Gzip => {
                let bytes = match &self.gzhead {
                    Some(h) => h.to_bytes(),
                    None => GzHeader::new().to_bytes(),
                };
                for b in bytes {
                    self.put_byte(io, b);
                }
                self.crc = INIT_CRC;
            }
            Wrap::Raw | Wrap::Auto => {}
        }
        self.state = DeflateState::Deflating;
    }

    /// Append a byte to the stream, overflowing into fifo_out.
    fn put_byte(&mut self, io: &mut Io, b: u8) {
        if io.avail_out() > 0 {
            io.output[io.out_pos] = b;
            io.out_pos += 1;
            self.total_out += 1;
        } else {
            let at = self.fifo_out.cur + self.fifo_out.used;
            self.fifo_out.buf[at] = b;
            self.fifo_out.used += 1;
        }
    }

    /// Move buffered output to the caller, then byte-align the tail if the
    /// fifo drained completely.
    fn copy_fifo_out_to_next_out(&mut self, io: &mut Io) {
        if self.fifo_out.used == 0 || io.avail_out() == 0 {
            return;
        }
        let n = self.fifo_out.used.min(io.avail_out());
        io.output[io.out_pos..io.out_pos + n]
            .copy_from_slice(&self.fifo_out.buf[self.fifo_out.cur..self.fifo_out.cur + n]);
        io.out_pos += n;
        self.total_out += n as u64;
        self.fifo_out.consume(n);
        self.fifo_out.compact_out();

        if self.tebc > 0
            && self.fifo_out.used == 0
            && !matches!(self.state, DeflateState::BFinal | DeflateState::Trailer)
        {
            // the withheld tail must be byte-aligned before anything follows
            let tebc = self.tebc;
            self.append_spanning_flush(io, FlushCompress::Sync, tebc, false);
        }
    }

    /// One stored-block round: header, engine copy, header rewrite.
    fn stored_block(&mut self, io: &mut Io) -> Result<(), Error> {
        let blk_head = io.out_pos;
        let old_tebc = self.tebc;

        // placeholder header, zero length, not final
        self.append_spanning_flush(io, FlushCompress::Sync, old_tebc, false);
        let hdr_in_out = io.out_pos - blk_head;

        if io.avail_in() > 0 || self.used_in() > 0 {
            let rc = self.compress_block(io, FunctionCode::Wrap)?;
            if !matches!(rc, NxStatus::Ok | NxStatus::OkSuspend) {
                return Err(Error::Data("copy job failed"));
            }
            self.update_checksum_combine();
        } else {
            self.spbc = 0;
        }

        let mut bfinal = false;
        if io.avail_in() == 0
            && self.used_in() == 0
            && self.flush == FlushCompress::Finish
            && self.need_stored_block <= i64::from(self.spbc)
        {
            self.state = DeflateState::BFinal;
            bfinal = true;
        }

        // rewrite with the copied size and the final bit
        let prior = if old_tebc > 0 && blk_head > 0 {
            io.output[blk_head - 1]
        } else {
            0
        };
        let hdr = stored_header_bytes(prior, old_tebc, bfinal, self.spbc);
        let skip = usize::from(hdr.replaces_last);
        for (k, &b) in hdr.bytes.iter().enumerate() {
            if hdr.replaces_last && k == 0 {
                io.output[blk_head - 1] = b;
                continue;
            }
            let j = k - skip;
            if j < hdr_in_out {
                io.output[blk_head + j] = b;
            } else {
                self.fifo_out.buf[j - hdr_in_out] = b;
            }
        }

        self.need_stored_block -= i64::from(self.spbc);
        if self.need_stored_block < 0 {
            self.need_stored_block = 0;
        }
        Ok(())
    }

    /// Compress as much input as allowed into a single engine block.
    fn compress_block(&mut self, io: &mut Io, fc: FunctionCode) -> Result<NxStatus, Error> {
        if io.avail_in() == 0 && self.used_in() == 0 {
            return Ok(NxStatus::OkNoAvailOut);
        }
        let limit = if fc == FunctionCode::Wrap {
            self.cfg.stored_block_len
        } else {
            self.cfg.per_job_len
        };

        self.cmd.set_fc(fc);

        // resume history comes from the armed dictionary
        let mut resume_len = 0usize;
        let mut resume_ptr: *const u8 = std::ptr::null();
        if self.dict_pending && fc != FunctionCode::Wrap {
            resume_len = self.dict.len().min(MAX_DICT_LEN) / 16 * 16;
            resume_ptr = self.dict[self.dict.len() - resume_len..].as_ptr();
            self.dict_pending = false;
        }
        self.cmd.cpb.set_histlen_bytes(resume_len as u32);

        self.ddl_in.clear();
        self.ddl_out.clear();
        let map_dde = |_| Error::Stream("descriptor list overflow");

        self.ddl_in.append(resume_ptr, resume_len).map_err(map_dde)?;
        if let Some(f) = &self.fifo_in {
            self.ddl_in.append(f.data().as_ptr(), f.used).map_err(map_dde)?;
        }
        let take_in = io.avail_in().min(self.cfg.def_buf_size as usize);
        self.ddl_in
            .append(io.next_in().as_ptr(), take_in)
            .map_err(map_dde)?;

        let take_out = io.avail_out().min(self.cfg.def_buf_size as usize);
        let out_start = io.out_pos;
        self.ddl_out
            .append(io.output[io.out_pos..].as_mut_ptr(), take_out)
            .map_err(map_dde)?;
        let free = self.fifo_out.free_half();
        let at = self.fifo_out.cur + self.fifo_out.used;
        let fifo_start = at;
        self.ddl_out
            .append(self.fifo_out.buf[at..].as_mut_ptr(), free)
            .map_err(map_dde)?;

        let mut bytes_in = self.ddl_in.total().min(limit + resume_len as u32);
        let mut bytes_out = self.ddl_out.total();

        self.cmd.cpb.in_crc = self.crc;
        self.cmd.cpb.in_adler = self.adler;

        let mut pgfault_retries = self.cfg.pgfault_retries;
        loop {
            self.ddl_in.set_total(bytes_in);
            crate::ddl::touch_pages(
                &*self.cmd as *const CommandBlock as *const u8,
                std::mem::size_of::<CommandBlock>(),
                self.cfg.page_size,
                false,
            );
            let _ = self.ddl_in.touch_pages(bytes_in as usize, self.cfg.page_size, false);
            let _ = self
                .ddl_out
                .touch_pages(bytes_out as usize, self.cfg.page_size, true);

            let cc = submit_job(&self.dev, &self.ddl_in, &self.ddl_out, &mut self.cmd, &self.cfg)
                .map_err(|_| Error::Errno("job submission failed"))?;

            match cc {
                CompCode::Translation => {
                    if pgfault_retries == self.cfg.pgfault_retries {
                        // first retry resubmits the exact same job
                        pgfault_retries -= 1;
                        continue;
                    }
                    if pgfault_retries == 0 {
                        warn!("too many page fault retries");
                        return Err(Error::Errno("cannot make progress past page faults"));
                    }
                    pgfault_retries -= 1;
                    bytes_in = shrink_input(bytes_in, resume_len as u32);
                    if bytes_out > 2 * MAX_EXPANSION_LEN {
                        bytes_out = (bytes_out + 1) / 2;
                    } else if bytes_out > MAX_EXPANSION_LEN {
                        bytes_out = MAX_EXPANSION_LEN;
                    }
                    continue;
                }
                CompCode::DataLength => {
                    let csb = &self.cmd.crb.csb;
                    if !csb.ce_termination() && csb.ce_partial_completion() {
                        // suspended at a byte-count limit; counts are valid
                        self.update_offsets(io, fc, out_start, fifo_start);
                        self.append_flush_block(io);
                        return Ok(NxStatus::OkSuspend);
                    }
                    return Err(Error::Data("invalid history length"));
                }
                CompCode::TargetSpace => {
                    bytes_in = shrink_input(bytes_in, resume_len as u32);
                    trace!(bytes_in, "target space exhausted, retrying smaller");
                    continue;
                }
                CompCode::TpbcGtSpbc => {
                    // output would be larger than the input; report size so
                    // the caller can emit stored blocks instead
                    let hist = self.cmd.cpb.histlen_bytes();
                    self.spbc = self.cmd.cpb.spbc(fc) - hist;
                    return Ok(NxStatus::OkBigTarget);
                }
                CompCode::Ok => {
                    self.update_offsets(io, fc, out_start, fifo_start);
                    self.append_flush_block(io);
                    return Ok(NxStatus::Ok);
                }
                other => {
                    warn!(?other, "fatal completion code");
                    return Err(Error::Data("engine reported an unrecoverable error"));
                }
            }
        }
    }

    /// Fold a completed job's byte counts into the stream and fifo state;
    /// also decides the in-place BFINAL bit.
    fn update_offsets(&mut self, io: &mut Io, fc: FunctionCode, out_start: usize, fifo_start: usize) {
        let histbytes = self.cmd.cpb.histlen_bytes();
        let spbc_total = self.cmd.cpb.spbc(fc);
        debug_assert!(spbc_total >= histbytes);
        self.spbc = spbc_total - histbytes;
        self.tpbc = self.cmd.crb.csb.tpbc;
        self.tebc = if fc == FunctionCode::Wrap {
            0
        } else {
            self.cmd.cpb.out_tebc
        };

        trace!(spbc = self.spbc, tpbc = self.tpbc, tebc = self.tebc, "job done");

        // input side: fifo_in first, then the caller's buffer
        let mut sp = self.spbc as usize;
        if let Some(f) = &mut self.fifo_in {
            let from_fifo = sp.min(f.used);
            f.consume(from_fifo);
            sp -= from_fifo;
            if f.used == 0 {
                f.cur = 0;
            } else {
                f.compact();
            }
        }
        io.in_pos += sp;
        self.total_in += sp as u64;

        // output side: caller's buffer first, overflow into fifo_out
        let copy_bytes = (self.tpbc as usize).min(io.avail_out());

        let finishing = io.avail_in() == 0
            && self.used_in() == 0
            && self.flush == FlushCompress::Finish
            && fc != FunctionCode::Wrap;
        if finishing {
            // the job started byte-aligned, so its first output byte holds
            // the block header and bit 0 is BFINAL
            if copy_bytes > 0 {
                io.output[out_start] |= 1;
            } else {
                self.fifo_out.buf[fifo_start] |= 1;
            }
            self.state = DeflateState::BFinal;
        }

        io.out_pos += copy_bytes;
        self.total_out += copy_bytes as u64;
        let overflow = self.tpbc as usize - copy_bytes;
        debug_assert!(overflow <= self.fifo_out.len() / 2);
        self.fifo_out.used += overflow;

        self.invoke_cnt += 1;
    }

    /// After a block, keep the stream continuable: byte-align with a sync
    /// flush or honor the caller's flush request.
    fn append_flush_block(&mut self, io: &mut Io) {
        if self.fifo_out.used > 0 {
            // output overflowed; alignment is postponed until the fifo
            // drains into the caller's buffer
            return;
        }
        if self.state == DeflateState::BFinal {
            return;
        }
        let tebc = self.tebc;
        match self.flush {
            FlushCompress::Partial => {
                self.append_spanning_flush(io, FlushCompress::Partial, tebc, false);
            }
            FlushCompress::Sync | FlushCompress::Full => {
                self.append_spanning_flush(io, FlushCompress::Sync, tebc, false);
            }
            FlushCompress::None | FlushCompress::Finish => {
                if tebc > 0 {
                    self.append_spanning_flush(io, FlushCompress::Sync, tebc, false);
                }
            }
        }
    }

    /// Write a flush block that may span the caller's buffer and fifo_out.
    fn append_spanning_flush(&mut self, io: &mut Io, kind: FlushCompress, tebc: u8, final_: bool) {
        debug_assert!(self.fifo_out.used == 0 && self.fifo_out.cur == 0);

        let prior = if tebc > 0 {
            debug_assert!(io.out_pos > 0);
            io.output[io.out_pos - 1]
        } else {
            0
        };

        let (seq, replaces, new_tebc) = match kind {
            FlushCompress::Sync | FlushCompress::Full => {
                let f = sync_flush_bytes(prior, tebc, final_);
                (f.bytes, f.replaces_last, 0)
            }
            FlushCompress::Partial => {
                // a sync flush first guarantees the single-partial-flush
                // condition of the two-empty-blocks algorithm
                let s = sync_flush_bytes(prior, tebc, false);
                let p = partial_flush_bytes(0, 0, final_);
                let mut bytes = s.bytes;
                bytes.extend_from_slice(&p.bytes);
                (bytes, s.replaces_last, p.new_tebc)
            }
            _ => return,
        };
        self.tebc = new_tebc;

        let mut iter = seq.into_iter();
        if replaces {
            io.output[io.out_pos - 1] = iter.next().unwrap();
        }
        for b in iter {
            self.put_byte(io, b);
        }

        // a trailing partial byte cannot be handed to the caller; withhold
        // it in fifo_out to be aligned when the fifo next drains
        if self.fifo_out.used == 0 && self.tebc > 0 {
            debug_assert_eq!(self.tebc, 2);
            io.out_pos -= 1;
            self.total_out -= 1;
            self.fifo_out.buf[0] = io.output[io.out_pos];
            self.fifo_out.cur = 0;
            self.fifo_out.used = 1;
        }
    }

    fn append_trailer(&mut self, io: &mut Io) {
        match self.wrap {
            Wrap::Gzip => {
                let crc = self.crc;
                let isize_ = self.total_in as u32;
                trace!(crc, isize_, "gzip trailer");
                for b in crc.to_le_bytes() {
                    self.put_byte(io, b);
                }
                for b in isize_.to_le_bytes() {
                    self.put_byte(io, b);
                }
            }
            Wrap::Zlib => {
                let adler = self.adler;
                trace!(adler, "zlib trailer");
                for b in adler.to_be_bytes() {
                    self.put_byte(io, b);
                }
            }
            Wrap::Raw | Wrap::Auto => {}
        }
    }

    /// Checksums straight from the engine (function codes that chain).
    fn update_checksum_direct(&mut self) {
        self.adler = self.cmd.cpb.out_adler;
        self.crc = self.cmd.cpb.out_crc;
    }

    /// Combine-mode update for function codes that take no initial value.
    fn update_checksum_combine(&mut self) {
        let len = i64::from(self.spbc);
        self.adler = adler32_combine(self.adler, self.cmd.cpb.out_adler, len);
        self.crc = crc32_combine(self.crc, self.cmd.cpb.out_crc, len);
    }

    /// Running checksum of the stream: Adler-32 for zlib, CRC-32 otherwise.
    pub fn checksum(&self) -> u32 {
        match self.wrap {
            Wrap::Zlib => self.adler,
            _ => self.crc,
        }
    }
}

impl Drop for Deflate {
    fn drop(&mut self) {
        self.dev.count(self.cfg.stats, |s| s.deflate_end += 1);
    }
}

fn shrink_input(bytes_in: u32, resume_len: u32) -> u32 {
    let data = bytes_in - resume_len;
    let data = if data > 2 * MIN_INPUT_LEN {
        (data + 1) / 2
    } else if data > MIN_INPUT_LEN {
        MIN_INPUT_LEN
    } else {
        data
    };
    data + resume_len
}

struct FlushBytes {
    bytes: Vec<u8>,
    /// The first byte replaces the stream's last, partially filled byte.
    replaces_last: bool,
    new_tebc: u8,
}

/// An empty stored block gluing the previous block to a byte boundary.
/// Appends 4 bytes when 1-5 residual bits fit the current byte, 5 otherwise.
fn sync_flush_bytes(last_partial: u8, tebc: u8, final_: bool) -> FlushBytes {
    stored_header_bytes(last_partial, tebc, final_, 0)
}

/// A stored block header (BFINAL, BTYPE=00, LEN, NLEN) appended at bit
/// position `tebc` of the previous byte.
fn stored_header_bytes(last_partial: u8, tebc: u8, final_: bool, block_len: u32) -> FlushBytes {
    debug_assert!(tebc < 8);
    debug_assert!(block_len < 0x10000);
    let shift = u32::from(tebc & 7);
    let first = if tebc > 0 {
        u64::from(last_partial & ((1u8 << tebc) - 1))
    } else {
        0
    };
    let blen = u64::from(!block_len << 16 | (block_len & 0xffff)) & 0xffff_ffff;
    let mut flush = (u64::from(final_ as u8) << shift) | first;
    let hdr = if shift + 3 <= 8 { 8 } else { 16 };
    flush |= blen << hdr;
    let total_bits = hdr + 32;

    let mut bytes = Vec::with_capacity(6);
    let mut left = total_bits;
    while left > 0 {
        bytes.push(flush as u8);
        flush >>= 8;
        left -= 8;
    }
    FlushBytes {
        bytes,
        replaces_last: tebc > 0,
        new_tebc: 0,
    }
}

/// A 10-bit empty fixed-Huffman block (BTYPE=01 plus the 7-bit EOB).
fn partial_flush_bytes(last_partial: u8, tebc: u8, final_: bool) -> FlushBytes {
    debug_assert!(tebc < 8);
    let shift = u32::from(tebc & 7);
    let prior = if tebc > 0 {
        u64::from(last_partial & ((1u8 << tebc) - 1))
    } else {
        0
    };
    let flush = ((0x2u64 | u64::from(final_ as u8)) << shift) | prior;
    let total_bits = shift + 10;

    let mut bytes = Vec::with_capacity(3);
    let mut acc = flush;
    let mut left = total_bits as i32;
    while left > 0 {
        bytes.push(acc as u8);
        acc >>= 8;
        left -= 8;
    }
    FlushBytes {
        bytes,
        replaces_last: tebc > 0,
        new_tebc: (total_bits % 8) as u8,
    }
}
