//! The software engine: a portable implementation of the accelerator
//! command ABI.
//!
//! It honors the contract the streams are written against: one deflate
//! block per compress job starting byte-aligned, a true target ending bit
//! count, LZ symbol statistics for the COUNT function codes, checksum
//! chaining through the parameter block, and partial-completion reporting
//! with source-final-block-type clues on the decompress side. Decompression
//! itself runs on miniz_oxide's inflate core with a 32 KiB window carried
//! between jobs.

use std::collections::HashMap;
use std::sync::Mutex;

use miniz_oxide::inflate::core::{decompress, inflate_flags, DecompressorOxide};
use miniz_oxide::inflate::TINFLStatus;
use tracing::trace;

use crate::checksum::{adler32, crc32, INIT_ADLER, INIT_CRC};
use crate::cmd::{sfbt, CommandBlock, FunctionCode, CE_PARTIAL_COMPLETION, CE_TERMINATION, DSZ, LLSZ};
use crate::ddl::{self, Dde};
use crate::device::PasteWindow;
use crate::dht::BitWriter;
use crate::error::CompCode;

const WINDOW: usize = 32768;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 258;
/// Hash-chain probes per position; bounds the match search.
const MAX_CHAIN: usize = 32;

struct InflateSession {
    decomp: Box<DecompressorOxide>,
    window: Vec<u8>,
}

/// The engine behind [`Device::software`](crate::Device::software).
pub(crate) struct SoftEngine {
    sessions: Mutex<HashMap<usize, InflateSession>>,
}

impl SoftEngine {
    pub fn new() -> SoftEngine {
        SoftEngine {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl PasteWindow for SoftEngine {
    fn paste(&self, cmd: &mut CommandBlock) -> bool {
        let fc = match function_code(cmd.crb.gzip_fc) {
            Some(fc) => fc,
            None => {
                cmd.crb.csb.complete(CompCode::UnsupportedFc as u8, CE_TERMINATION, 0);
                return true;
            }
        };

        let src = match unsafe { gather(&cmd.crb.source_dde) } {
            Ok(v) => v,
            Err(cc) => {
                cmd.crb.csb.complete(cc as u8, CE_TERMINATION, 0);
                return true;
            }
        };
        let target_total = cmd.crb.target_dde.ddebc as usize;

        trace!(fc = cmd.crb.gzip_fc, src = src.len(), dst = target_total, "soft job");

        match fc {
            FunctionCode::Wrap => self.wrap(cmd, &src, target_total),
            FunctionCode::Decompress | FunctionCode::DecompressResume => {
                self.decompress_job(cmd, fc, &src, target_total)
            }
            _ => self.compress_job(cmd, fc, &src, target_total),
        }
        true
    }
}

impl SoftEngine {
    fn wrap(&self, cmd: &mut CommandBlock, src: &[u8], target_total: usize) {
        if src.len() > target_total {
            cmd.crb.csb.complete(CompCode::TargetSpace as u8, CE_TERMINATION, 0);
            return;
        }
        if let Err(cc) = unsafe { scatter(&cmd.crb.target_dde, src) } {
            cmd.crb.csb.complete(cc as u8, CE_TERMINATION, 0);
            return;
        }
        // wrap takes no initial checksums; it reports this job's alone
        cmd.cpb.out_crc = crc32(INIT_CRC, src);
        cmd.cpb.out_adler = adler32(INIT_ADLER, src);
        cmd.cpb.out_tebc = 0;
        cmd.cpb.out_spbc_comp = src.len() as u32;
        cmd.crb.csb.complete(CompCode::Ok as u8, 0, src.len() as u32);
    }

    fn compress_job(&self, cmd: &mut CommandBlock, fc: FunctionCode, src: &[u8], target_total: usize) {
        let hist = (cmd.cpb.histlen_bytes() as usize).min(src.len());
        let data = &src[hist..];

        let block = compress_fht_block(src, hist);
        if block.bytes.len() > target_total {
            cmd.crb.csb.complete(CompCode::TargetSpace as u8, CE_TERMINATION, 0);
            return;
        }
        if let Err(cc) = unsafe { scatter(&cmd.crb.target_dde, &block.bytes) } {
            cmd.crb.csb.complete(cc as u8, CE_TERMINATION, 0);
            return;
        }

        let spbc = src.len() as u32;
        let tpbc = block.bytes.len() as u32;

        cmd.cpb.out_tebc = block.tebc;
        cmd.cpb.out_crc = crc32(cmd.cpb.in_crc, data);
        cmd.cpb.out_adler = adler32(cmd.cpb.in_adler, data);
        if fc.has_count() {
            for (dst, &c) in cmd.cpb.out_lzcount.iter_mut().zip(block.counts.iter()) {
                *dst = c.to_be();
            }
            cmd.cpb.out_spbc_comp_with_count = spbc;
        } else {
            cmd.cpb.out_spbc_comp = spbc;
        }

        let cc = if tpbc > spbc {
            CompCode::TpbcGtSpbc
        } else {
            CompCode::Ok
        };
        cmd.crb.csb.complete(cc as u8, 0, tpbc);
    }

    fn decompress_job(&self, cmd: &mut CommandBlock, fc: FunctionCode, src: &[u8], target_total: usize) {
        let hist = (cmd.cpb.histlen_bytes() as usize).min(src.len());
        let data = &src[hist..];
        let key = cmd.session_key();

        let mut sessions = self.sessions.lock().unwrap();
        if fc == FunctionCode::Decompress {
            // a fresh stream resets whatever context the key carried
            sessions.remove(&key);
        }
        let session = sessions.entry(key).or_insert_with(|| {
            let mut window = src[..hist].to_vec();
            if window.len() > WINDOW {
                window.drain(..window.len() - WINDOW);
            }
            InflateSession {
                decomp: Box::new(DecompressorOxide::new()),
                window,
            }
        });

        let window_len = session.window.len();
        let mut out_buf = vec![0u8; window_len + target_total];
        out_buf[..window_len].copy_from_slice(&session.window);

        let flags = inflate_flags::TINFL_FLAG_HAS_MORE_INPUT
            | inflate_flags::TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF;
        let (status, in_read, out_written) =
            decompress(&mut session.decomp, data, &mut out_buf, window_len, flags);
        let produced = &out_buf[window_len..window_len + out_written];

        if let Err(cc) = unsafe { scatter(&cmd.crb.target_dde, produced) } {
            cmd.crb.csb.complete(cc as u8, CE_TERMINATION, 0);
            return;
        }

        // carry the trailing window for the next job
        let total = window_len + out_written;
        let keep = total.min(WINDOW);
        session.window = out_buf[total - keep..total].to_vec();

        cmd.cpb.out_crc = crc32(cmd.cpb.in_crc, produced);
        cmd.cpb.out_adler = adler32(cmd.cpb.in_adler, produced);
        cmd.cpb.out_spbc_decomp = (hist + in_read) as u32;
        cmd.cpb.out_subc = 0;
        cmd.cpb.out_rembytecnt = 0;

        match status {
            TINFLStatus::Done => {
                sessions.remove(&key);
                cmd.cpb.out_sfbt = sfbt::FINAL_EOB;
                cmd.crb
                    .csb
                    .complete(CompCode::DataLength as u8, CE_PARTIAL_COMPLETION, out_written as u32);
            }
            TINFLStatus::NeedsMoreInput | TINFLStatus::HasMoreOutput => {
                cmd.cpb.out_sfbt = sfbt::HDR;
                cmd.crb
                    .csb
                    .complete(CompCode::DataLength as u8, CE_PARTIAL_COMPLETION, out_written as u32);
            }
            _ => {
                sessions.remove(&key);
                cmd.crb.csb.complete(CompCode::DataError as u8, CE_TERMINATION, 0);
            }
        }
    }
}

fn function_code(raw: u8) -> Option<FunctionCode> {
    Some(match raw {
        x if x == FunctionCode::CompressFht as u8 => FunctionCode::CompressFht,
        x if x == FunctionCode::CompressDhtCount as u8 => FunctionCode::CompressDhtCount,
        x if x == FunctionCode::CompressResumeFht as u8 => FunctionCode::CompressResumeFht,
        x if x == FunctionCode::CompressResumeDht as u8 => FunctionCode::CompressResumeDht,
        x if x == FunctionCode::CompressResumeFhtCount as u8 => FunctionCode::CompressResumeFhtCount,
        x if x == FunctionCode::CompressResumeDhtCount as u8 => FunctionCode::CompressResumeDhtCount,
        x if x == FunctionCode::Decompress as u8 => FunctionCode::Decompress,
        x if x == FunctionCode::DecompressResume as u8 => FunctionCode::DecompressResume,
        x if x == FunctionCode::Wrap as u8 => FunctionCode::Wrap,
        _ => return None,
    })
}

/// Copy the bytes described by a descriptor head into one buffer, bounded
/// by the head's aggregate byte count.
unsafe fn gather(head: &Dde) -> Result<Vec<u8>, CompCode> {
    let want = head.ddebc as usize;
    if head.count != 0 && (ddl::child_byte_count(head)? as usize) < want {
        return Err(CompCode::DdeOverflow);
    }
    let segs = ddl::segments(head)?;
    let mut out = Vec::with_capacity(want);
    for (addr, len) in segs {
        if out.len() >= want {
            break;
        }
        let take = (len as usize).min(want - out.len());
        out.extend_from_slice(std::slice::from_raw_parts(addr as *const u8, take));
    }
    Ok(out)
}

/// Spread `data` across the segments of a descriptor head.
unsafe fn scatter(head: &Dde, data: &[u8]) -> Result<(), CompCode> {
    if data.len() > head.ddebc as usize {
        return Err(CompCode::TargetSpace);
    }
    let segs = ddl::segments(head)?;
    let mut off = 0;
    for (addr, len) in segs {
        if off >= data.len() {
            break;
        }
        let take = (len as usize).min(data.len() - off);
        std::ptr::copy_nonoverlapping(data[off..].as_ptr(), addr as *mut u8, take);
        off += take;
    }
    Ok(())
}

struct FhtBlock {
    bytes: Vec<u8>,
    /// Valid bits in the last byte; 0 when the block ends byte-aligned.
    tebc: u8,
    counts: [u32; LLSZ + DSZ],
}

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

fn length_code(len: usize) -> (usize, u32, u8) {
    debug_assert!((MIN_MATCH..=MAX_MATCH).contains(&len));
    let mut i = LENGTH_BASE.len() - 1;
    while usize::from(LENGTH_BASE[i]) > len {
        i -= 1;
    }
    // 258 has its own zero-extra code
    if len == MAX_MATCH {
        i = 28;
    }
    (i, (len - usize::from(LENGTH_BASE[i])) as u32, LENGTH_EXTRA[i])
}

fn dist_code(dist: usize) -> (usize, u32, u8) {
    debug_assert!((1..=WINDOW).contains(&dist));
    let mut i = DIST_BASE.len() - 1;
    while usize::from(DIST_BASE[i]) > dist {
        i -= 1;
    }
    (i, (dist - usize::from(DIST_BASE[i])) as u32, DIST_EXTRA[i])
}

fn push_litlen(w: &mut BitWriter, sym: usize) {
    // fixed literal/length code, four canonical ranges
    match sym {
        0..=143 => w.push_code(0x30 + sym as u32, 8),
        144..=255 => w.push_code(0x190 + (sym as u32 - 144), 9),
        256..=279 => w.push_code(sym as u32 - 256, 7),
        _ => w.push_code(0xC0 + (sym as u32 - 280), 8),
    }
}

fn hash3(src: &[u8], i: usize) -> usize {
    let v = (src[i] as usize) | ((src[i + 1] as usize) << 8) | ((src[i + 2] as usize) << 16);
    (v.wrapping_mul(0x9E3779B1) >> 17) & (WINDOW - 1)
}

/// Greedy LZ77 over `src` starting at `start` (everything before it is
/// history), emitted as a single non-final fixed-Huffman block.
fn compress_fht_block(src: &[u8], start: usize) -> FhtBlock {
    let mut w = BitWriter::new();
    w.push(0, 1); // BFINAL, set later by the stream if at all
    w.push(0b01, 2); // BTYPE fixed
    let mut counts = [0u32; LLSZ + DSZ];

    let len = src.len();
    let mut head = vec![-1i64; WINDOW];
    let mut prev = vec![-1i64; WINDOW];

    let insert = |head: &mut Vec<i64>, prev: &mut Vec<i64>, pos: usize| {
        if pos + MIN_MATCH <= len {
            let h = hash3(src, pos);
            prev[pos & (WINDOW - 1)] = head[h];
            head[h] = pos as i64;
        }
    };

    for p in 0..start {
        insert(&mut head, &mut prev, p);
    }

    let mut i = start;
    while i < len {
        let mut best_len = 0usize;
        let mut best_dist = 0usize;

        if i + MIN_MATCH <= len {
            let h = hash3(src, i);
            let mut cand = head[h];
            let max_len = MAX_MATCH.min(len - i);
            let mut chain = 0;
            while cand >= 0 && chain < MAX_CHAIN {
                let c = cand as usize;
                if c >= i || i - c > WINDOW {
                    break;
                }
                let mut l = 0;
                while l < max_len && src[c + l] == src[i + l] {
                    l += 1;
                }
                if l > best_len {
                    best_len = l;
                    best_dist = i - c;
                    if l >= max_len {
                        break;
                    }
                }
                cand = prev[c & (WINDOW - 1)];
                chain += 1;
            }
        }

        if best_len >= MIN_MATCH {
            let (lsym, lextra, lbits) = length_code(best_len);
            push_litlen(&mut w, 257 + lsym);
            if lbits > 0 {
                w.push(lextra, u32::from(lbits));
            }
            let (dsym, dextra, dbits) = dist_code(best_dist);
            w.push_code(dsym as u32, 5);
            if dbits > 0 {
                w.push(dextra, u32::from(dbits));
            }
            counts[257 + lsym] += 1;
            counts[LLSZ + dsym] += 1;

            for p in i..i + best_len {
                insert(&mut head, &mut prev, p);
            }
            i += best_len;
        } else {
            let b = src[i];
            push_litlen(&mut w, usize::from(b));
            counts[usize::from(b)] += 1;
            insert(&mut head, &mut prev, i);
            i += 1;
        }
    }

    push_litlen(&mut w, 256); // EOB
    counts[256] += 1;

    let (bytes, total_bits) = w.finish();
    FhtBlock {
        bytes,
        tebc: (total_bits % 8) as u8,
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miniz_oxide::inflate::decompress_to_vec;

    /// Close a block stream with a final empty stored block so miniz can
    /// decode it standalone.
    fn finalize(mut blocks: Vec<u8>, tebc: u8) -> Vec<u8> {
        let mut w = BitWriter::new();
        if tebc > 0 {
            let last = blocks.pop().unwrap();
            w.push(u32::from(last) & ((1 << tebc) - 1), u32::from(tebc));
        }
        w.push(1, 1); // BFINAL
        w.push(0, 2); // stored
        let (mut tail, bits) = w.finish();
        let _ = bits;
        blocks.append(&mut tail);
        blocks.extend_from_slice(&[0x00, 0x00, 0xff, 0xff]);
        blocks
    }

    #[test]
    fn fht_block_decodes_back() {
        let data = b"abcabcabcabc hello hello hello world".repeat(20);
        let block = compress_fht_block(&data, 0);
        let stream = finalize(block.bytes.clone(), block.tebc);
        let out = decompress_to_vec(&stream).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn fht_block_compresses_runs() {
        let data = vec![0u8; 4096];
        let block = compress_fht_block(&data, 0);
        assert!(block.bytes.len() < 100);
        let stream = finalize(block.bytes.clone(), block.tebc);
        assert_eq!(decompress_to_vec(&stream).unwrap(), data);
    }

    #[test]
    fn fht_block_uses_history() {
        let mut src = Vec::new();
        src.extend_from_slice(&b"0123456789abcdef".repeat(16)); // history
        let start = src.len();
        src.extend_from_slice(&b"0123456789abcdef".repeat(16));
        // the block that can match into the history compresses better than
        // one that starts blind
        let with_hist = compress_fht_block(&src, start);
        let blind = compress_fht_block(&src[start..], 0);
        assert!(with_hist.bytes.len() <= blind.bytes.len());
    }

    #[test]
    fn lz_counts_cover_emitted_symbols() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let block = compress_fht_block(&data, 0);
        assert_eq!(block.counts[256], 1);
        let lits: u32 = block.counts[..256].iter().sum();
        let lens: u32 = block.counts[257..LLSZ].iter().sum();
        let dists: u32 = block.counts[LLSZ..].iter().sum();
        assert!(lits >= 1); // at least the first 'a'
        assert_eq!(lens, dists); // every match has one of each
        assert!(lens >= 1);
    }

    #[test]
    fn length_and_dist_code_tables() {
        assert_eq!(length_code(3), (0, 0, 0));
        assert_eq!(length_code(10), (7, 0, 0));
        assert_eq!(length_code(11), (8, 0, 1));
        assert_eq!(length_code(258), (28, 0, 0));
        assert_eq!(dist_code(1), (0, 0, 0));
        assert_eq!(dist_code(5), (4, 0, 1));
        assert_eq!(dist_code(32768), (29, 8191, 13));
    }

    #[test]
    fn tebc_matches_bit_count() {
        let block = compress_fht_block(b"x", 0);
        // 3 header bits + 8-bit literal + 7-bit EOB = 18 bits -> tebc 2
        assert_eq!(block.bytes.len(), 3);
        assert_eq!(block.tebc, 2);
    }
}
