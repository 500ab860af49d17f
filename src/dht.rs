//! Dynamic Huffman table cache.
//!
//! Compression jobs that request symbol statistics leave an LZ histogram in
//! the parameter block. The cache maps the histogram's most frequent
//! literal and length symbols to a previously synthesized table, so streams
//! with stable symbol distributions pay the table-construction cost once.
//! Misses synthesize a fresh canonical table with no missing codes and
//! install it over the least-used slot; two pinned entries that approximate
//! the fixed Huffman table survive invalidation.

use crate::cmd::{CommandBlock, DHT_MAX_BYTES, DSZ, LLSZ};

/// Cache capacity, including the pinned builtins.
const DHT_NUM_MAX: usize = 100;
/// Builtin entries; pinned with a negative use count.
const DHT_NUM_BUILTIN: usize = 2;
/// Use counts are halved across the cache when one would grow past this.
const USE_COUNT_LIMIT: i64 = 1 << 30;

/// What a lookup ended up doing, mirroring the engine's interest in
/// where its table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DhtLookup {
    /// A builtin entry was copied (or the request touched no table).
    Builtin,
    /// A cached table matched the histogram's top symbols.
    Hit,
    /// A fresh table was synthesized.
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DhtRequest {
    /// Copy the first builtin unconditionally.
    Default,
    /// Synthesize from the current histogram without touching the cache.
    Gen,
    /// Probe the cache by top symbols; synthesize and install on a miss.
    Search,
    /// Drop every non-pinned entry.
    Invalidate,
}

#[derive(Clone)]
struct CachedDht {
    /// -1 pins a builtin, 0 marks the slot unused.
    use_count: i64,
    dhtlen: u16,
    dht: [u8; DHT_MAX_BYTES],
    lit: [i32; 2],
    len: [i32; 2],
    dis: [i32; 2],
}

impl CachedDht {
    fn empty() -> CachedDht {
        CachedDht {
            use_count: 0,
            dhtlen: 0,
            dht: [0; DHT_MAX_BYTES],
            lit: [-1; 2],
            len: [-1; 2],
            dis: [-1; 2],
        }
    }
}

/// Top-2 symbols per alphabet range of one histogram.
#[derive(Debug, Clone, Copy)]
struct TopSymbols {
    lit: [i32; 2],
    len: [i32; 2],
    dis: [i32; 2],
}

pub(crate) struct DhtCache {
    entries: Vec<CachedDht>,
}

impl DhtCache {
    pub fn new() -> DhtCache {
        let mut entries = vec![CachedDht::empty(); DHT_NUM_MAX];

        // Builtins: a universal table over uniform counts; close enough to
        // the fixed Huffman table to be a safe default for any input.
        let uniform_ll = [1u32; LLSZ];
        let uniform_d = [1u32; DSZ];
        let (bytes, bits) = dhtgen(&uniform_ll, &uniform_d);
        for (i, e) in entries.iter_mut().take(DHT_NUM_BUILTIN).enumerate() {
            e.use_count = -1;
            e.dhtlen = bits;
            e.dht[..bytes.len()].copy_from_slice(&bytes);
            if i == 0 {
                // plain-text biased key so common text can hit a builtin
                e.lit = [b' ' as i32, b'e' as i32];
                e.len = [257, 258];
            }
        }

        DhtCache { entries }
    }

    /// Serve a table request into the command block's input DHT region.
    /// Reports whether the cache was hit, missed, or bypassed.
    pub fn lookup(&mut self, cmd: &mut CommandBlock, request: DhtRequest) -> DhtLookup {
        match request {
            DhtRequest::Default => {
                self.copy_to_cpb(0, cmd);
                DhtLookup::Builtin
            }
            DhtRequest::Invalidate => {
                for e in &mut self.entries {
                    if e.use_count > 0 {
                        e.use_count = 0;
                    }
                }
                DhtLookup::Builtin
            }
            DhtRequest::Gen => {
                for c in cmd.cpb.out_lzcount.iter_mut() {
                    *c = u32::from_be(*c);
                }
                let (ll, d) = split_counts(&mut cmd.cpb.out_lzcount);
                let (bytes, bits) = dhtgen(&ll, &d);
                write_to_cpb(cmd, &bytes, bits);
                DhtLookup::Computed
            }
            DhtRequest::Search => self.search(cmd),
        }
    }

    fn search(&mut self, cmd: &mut CommandBlock) -> DhtLookup {
        let top = top_symbols(&mut cmd.cpb.out_lzcount);

        // bias the probe start with the hottest literal
        let mut sidx = top.lit[0].max(0) as usize % DHT_NUM_MAX;

        let mut least_used_idx = 0;
        let mut least_used_count = USE_COUNT_LIMIT;

        for _ in 0..DHT_NUM_MAX {
            let used = self.entries[sidx].use_count;

            if used == 0 {
                // remember the first unused slot as the replacement victim
                if least_used_count != 0 {
                    least_used_count = 0;
                    least_used_idx = sidx;
                }
                sidx = (sidx + 1) % DHT_NUM_MAX;
                continue;
            }

            if used > 0 && used < least_used_count {
                least_used_count = used;
                least_used_idx = sidx;
            }

            let e = &self.entries[sidx];
            if e.lit[0] == top.lit[0]
                && e.len[0] == top.len[0]
                && e.lit[1] == top.lit[1]
                && e.len[1] == top.len[1]
            {
                tracing::trace!(idx = sidx, use_count = used, "dht cache hit");
                self.copy_to_cpb(sidx, cmd);
                if self.entries[sidx].use_count >= 0 {
                    self.entries[sidx].use_count += 1;
                }
                if self.entries[sidx].use_count > USE_COUNT_LIMIT {
                    // halving keeps zero at zero and nonzero nonzero
                    for e in &mut self.entries {
                        if e.use_count >= 0 {
                            e.use_count = (e.use_count + 1) / 2;
                        }
                    }
                }
                return DhtLookup::Hit;
            }

            sidx = (sidx + 1) % DHT_NUM_MAX;
        }

        // miss: synthesize and install over the victim
        let (ll, d) = split_counts(&mut cmd.cpb.out_lzcount);
        let (bytes, bits) = dhtgen(&ll, &d);
        write_to_cpb(cmd, &bytes, bits);

        let e = &mut self.entries[least_used_idx];
        e.dht = [0; DHT_MAX_BYTES];
        e.dht[..bytes.len()].copy_from_slice(&bytes);
        e.dhtlen = bits;
        e.use_count = 1;
        e.lit = top.lit;
        e.len = top.len;
        e.dis = top.dis;
        tracing::trace!(idx = least_used_idx, bits, "dht cache install");
        DhtLookup::Computed
    }

    fn copy_to_cpb(&self, idx: usize, cmd: &mut CommandBlock) {
        let e = &self.entries[idx];
        let nbytes = (usize::from(e.dhtlen) + 7) / 8;
        cmd.cpb.in_dhtlen = e.dhtlen;
        cmd.cpb.in_dht.0[..nbytes].copy_from_slice(&e.dht[..nbytes]);
    }

    #[cfg(test)]
    fn use_count(&self, idx: usize) -> i64 {
        self.entries[idx].use_count
    }
}

/// Find the two most frequent symbols of the literal, length, and distance
/// ranges. Counts arrive big-endian from the engine and are swapped to
/// native order in place on this first touch.
fn top_symbols(counts: &mut [u32; LLSZ + DSZ]) -> TopSymbols {
    for c in counts.iter_mut() {
        *c = u32::from_be(*c);
    }

    fn top2(counts: &[u32], base: usize, range: std::ops::Range<usize>) -> [i32; 2] {
        let mut top = [(-1i32, 0u32); 2];
        for i in range {
            let c = counts[i - base];
            if c > top[0].1 {
                top[1] = top[0];
                top[0] = (i as i32, c);
            } else if c > top[1].1 {
                top[1] = (i as i32, c);
            }
        }
        [top[0].0, top[1].0]
    }

    TopSymbols {
        lit: top2(&counts[..], 0, 0..256),
        len: top2(&counts[..], 0, 257..LLSZ),
        dis: {
            let d = top2(&counts[LLSZ..], 0, 0..DSZ);
            [
                if d[0] < 0 { d[0] } else { d[0] + LLSZ as i32 },
                if d[1] < 0 { d[1] } else { d[1] + LLSZ as i32 },
            ]
        },
    }
}

/// Split a native-order histogram into literal/length and distance halves,
/// promoting zero counts to one so every symbol gets a code.
fn split_counts(counts: &mut [u32; LLSZ + DSZ]) -> ([u32; LLSZ], [u32; DSZ]) {
    let mut ll = [0u32; LLSZ];
    let mut d = [0u32; DSZ];
    for (i, c) in ll.iter_mut().enumerate() {
        *c = counts[i].max(1);
    }
    for (i, c) in d.iter_mut().enumerate() {
        *c = counts[LLSZ + i].max(1);
    }
    (ll, d)
}

fn write_to_cpb(cmd: &mut CommandBlock, bytes: &[u8], bits: u16) {
    cmd.cpb.in_dhtlen = bits;
    cmd.cpb.in_dht.0[..bytes.len()].copy_from_slice(bytes);
}

/// Code-length alphabet transmission order.
const CL_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

/// Synthesize the dynamic Huffman table image for one histogram: the block
/// header bits from HLIT through the code-length-coded lengths, without the
/// leading BFINAL/BTYPE bits, which belong to the engine. Returns the
/// serialized bytes and the exact bit length.
pub(crate) fn dhtgen(litlen: &[u32; LLSZ], dist: &[u32; DSZ]) -> (Vec<u8>, u16) {
    let ll_lens = huffman_lengths(litlen, 15);
    let d_lens = huffman_lengths(dist, 15);

    // run-length code the two length vectors as one sequence
    let mut all = Vec::with_capacity(LLSZ + DSZ);
    all.extend_from_slice(&ll_lens);
    all.extend_from_slice(&d_lens);
    let tokens = rle_code_lengths(&all);

    let mut cl_counts = [0u32; 19];
    for t in &tokens {
        cl_counts[t.code as usize] += 1;
    }
    let cl_lens = huffman_lengths(&cl_counts, 7);
    let cl_codes = canonical_codes(&cl_lens);

    let mut hclen = CL_ORDER.len();
    while hclen > 4 && cl_lens[CL_ORDER[hclen - 1]] == 0 {
        hclen -= 1;
    }

    let mut w = BitWriter::new();
    w.push((LLSZ - 257) as u32, 5); // HLIT
    w.push((DSZ - 1) as u32, 5); // HDIST
    w.push((hclen - 4) as u32, 4); // HCLEN
    for &sym in CL_ORDER.iter().take(hclen) {
        w.push(u32::from(cl_lens[sym]), 3);
    }
    for t in &tokens {
        let sym = t.code as usize;
        w.push_code(cl_codes[sym], cl_lens[sym]);
        if t.extra_bits > 0 {
            w.push(t.extra, u32::from(t.extra_bits));
        }
    }

    let (bytes, bits) = w.finish();
    debug_assert!(bytes.len() <= DHT_MAX_BYTES);
    debug_assert!(bits >= 42);
    (bytes, bits as u16)
}

struct RleToken {
    code: u8,
    extra: u32,
    extra_bits: u8,
}

/// RFC 1951 code-length run coding: 16 repeats the previous length 3-6
/// times, 17 and 18 send runs of zeros.
fn rle_code_lengths(lens: &[u8]) -> Vec<RleToken> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < lens.len() {
        let cur = lens[i];
        let mut run = 1;
        while i + run < lens.len() && lens[i + run] == cur {
            run += 1;
        }

        if cur == 0 {
            let mut left = run;
            while left >= 11 {
                let n = left.min(138);
                out.push(RleToken { code: 18, extra: (n - 11) as u32, extra_bits: 7 });
                left -= n;
            }
            if left >= 3 {
                out.push(RleToken { code: 17, extra: (left - 3) as u32, extra_bits: 3 });
                left = 0;
            }
            for _ in 0..left {
                out.push(RleToken { code: 0, extra: 0, extra_bits: 0 });
            }
        } else {
            out.push(RleToken { code: cur, extra: 0, extra_bits: 0 });
            let mut left = run - 1;
            while left >= 3 {
                let n = left.min(6);
                out.push(RleToken { code: 16, extra: (n - 3) as u32, extra_bits: 2 });
                left -= n;
            }
            for _ in 0..left {
                out.push(RleToken { code: cur, extra: 0, extra_bits: 0 });
            }
        }
        i += run;
    }
    out
}

/// Length-limited Huffman code lengths for `freqs`; zero-frequency symbols
/// get no code. Follows the classic build-then-rebalance scheme: optimal
/// depths from the merge tree, then the depth histogram is rebalanced until
/// nothing exceeds `max_bits`, then lengths are dealt back to symbols from
/// least frequent to most frequent.
pub(crate) fn huffman_lengths(freqs: &[u32], max_bits: u8) -> Vec<u8> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let max_bits = usize::from(max_bits);
    let mut lens = vec![0u8; freqs.len()];

    let mut leaves: Vec<(usize, u32)> = freqs
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .map(|(i, &f)| (i, f))
        .collect();

    match leaves.len() {
        0 => return lens,
        1 => {
            lens[leaves[0].0] = 1;
            return lens;
        }
        _ => {}
    }

    // merge tree with parent links; node ids are indices into `parent`
    let n = leaves.len();
    let mut parent = vec![usize::MAX; 2 * n - 1];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = leaves
        .iter()
        .enumerate()
        .map(|(node, &(_, f))| Reverse((u64::from(f), node)))
        .collect();
    let mut next = n;
    while heap.len() > 1 {
        let Reverse((fa, a)) = heap.pop().unwrap();
        let Reverse((fb, b)) = heap.pop().unwrap();
        parent[a] = next;
        parent[b] = next;
        heap.push(Reverse((fa + fb, next)));
        next += 1;
    }

    let depth_of = |mut node: usize| {
        let mut d = 0usize;
        while parent[node] != usize::MAX {
            node = parent[node];
            d += 1;
        }
        d
    };

    // depth histogram, clamped, with the excess recorded
    let mut bl_count = vec![0u32; max_bits + 2];
    let mut depths: Vec<usize> = (0..n).map(depth_of).collect();
    let mut overflow = 0i32;
    for d in &depths {
        if *d > max_bits {
            overflow += 1;
            bl_count[max_bits] += 1;
        } else {
            bl_count[*d] += 1;
        }
    }
    while overflow > 0 {
        let mut bits = max_bits - 1;
        while bl_count[bits] == 0 {
            bits -= 1;
        }
        bl_count[bits] -= 1;
        bl_count[bits + 1] += 2;
        bl_count[max_bits] -= 1;
        overflow -= 2;
    }

    // deal lengths back: deepest (rarest) symbols take the longest codes
    for d in &mut depths {
        *d = (*d).min(max_bits);
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (Reverse(depths[i]), leaves[i].1, leaves[i].0));

    let mut bits = max_bits;
    for &i in &order {
        while bl_count[bits] == 0 {
            bits -= 1;
        }
        bl_count[bits] -= 1;
        lens[leaves[i].0] = bits as u8;
    }
    lens
}

/// Canonical code values for a set of code lengths, RFC 1951 ordering.
pub(crate) fn canonical_codes(lens: &[u8]) -> Vec<u32> {
    let max_len = lens.iter().copied().max().unwrap_or(0) as usize;
    let mut bl_count = vec![0u32; max_len + 1];
    for &l in lens {
        if l > 0 {
            bl_count[l as usize] += 1;
        }
    }
    let mut next_code = vec![0u32; max_len + 2];
    let mut code = 0u32;
    for bits in 1..=max_len {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }
    lens.iter()
        .map(|&l| {
            if l == 0 {
                0
            } else {
                let c = next_code[l as usize];
                next_code[l as usize] += 1;
                c
            }
        })
        .collect()
}

/// LSB-first deflate bit stream assembly; Huffman codes go in MSB-first.
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    nbits: u32,
    total_bits: usize,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter {
            bytes: Vec::new(),
            acc: 0,
            nbits: 0,
            total_bits: 0,
        }
    }

    pub fn push(&mut self, v: u32, n: u32) {
        debug_assert!(n <= 32);
        debug_assert!(n == 32 || u64::from(v) >> n == 0);
        self.acc |= u64::from(v) << self.nbits;
        self.nbits += n;
        self.total_bits += n as usize;
        while self.nbits >= 8 {
            self.bytes.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    /// Emit a Huffman code: bits reversed so the decoder sees them
    /// most-significant first.
    pub fn push_code(&mut self, code: u32, len: u8) {
        debug_assert!(len > 0);
        let rev = code.reverse_bits() >> (32 - u32::from(len));
        self.push(rev, u32::from(len));
    }

    /// Flush the partial byte and return (bytes, exact bit count).
    pub fn finish(mut self) -> (Vec<u8>, usize) {
        if self.nbits > 0 {
            self.bytes.push(self.acc as u8);
        }
        (self.bytes, self.total_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::FunctionCode;

    fn kraft_is_complete(lens: &[u8]) -> bool {
        let sum: u64 = lens
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 1u64 << (15 - u32::from(l)))
            .sum();
        sum == 1 << 15
    }

    #[test]
    fn huffman_lengths_complete_and_limited() {
        let mut freqs = [1u32; LLSZ];
        freqs[b'e' as usize] = 5000;
        freqs[b' ' as usize] = 7000;
        freqs[257] = 900;
        let lens = huffman_lengths(&freqs, 15);
        assert!(lens.iter().all(|&l| l >= 1 && l <= 15));
        assert!(kraft_is_complete(&lens));
        // hottest symbols get the shortest codes
        assert!(lens[b' ' as usize] <= lens[b'q' as usize]);
    }

    #[test]
    fn huffman_skewed_counts_hit_the_limit() {
        // fibonacci-ish counts force deep optimal trees
        let mut freqs = [0u32; 40];
        let (mut a, mut b) = (1u32, 1u32);
        for f in freqs.iter_mut() {
            *f = a;
            let c = a.saturating_add(b);
            a = b;
            b = c;
        }
        let lens = huffman_lengths(&freqs, 15);
        assert!(lens.iter().all(|&l| l >= 1 && l <= 15));
        assert!(kraft_is_complete(&lens));
    }

    #[test]
    fn huffman_degenerate_alphabets() {
        assert!(huffman_lengths(&[0; 10], 15).iter().all(|&l| l == 0));
        let one = huffman_lengths(&[0, 9, 0], 15);
        assert_eq!(one, vec![0, 1, 0]);
        let two = huffman_lengths(&[3, 0, 9], 15);
        assert_eq!(two[0], 1);
        assert_eq!(two[2], 1);
    }

    #[test]
    fn canonical_codes_are_prefix_ordered() {
        let lens = [2u8, 1, 3, 3];
        let codes = canonical_codes(&lens);
        assert_eq!(codes, vec![0b10, 0b0, 0b110, 0b111]);
    }

    #[test]
    fn dhtgen_fits_the_cpb_region() {
        let ll = [1u32; LLSZ];
        let d = [1u32; DSZ];
        let (bytes, bits) = dhtgen(&ll, &d);
        assert!(bytes.len() <= DHT_MAX_BYTES);
        assert!(bits >= 42);
        assert_eq!(bytes.len(), (usize::from(bits) + 7) / 8);
    }

    #[test]
    fn dhtgen_worst_case_alternating_lengths() {
        // defeat run coding with alternating counts
        let mut ll = [1u32; LLSZ];
        for (i, c) in ll.iter_mut().enumerate() {
            *c = if i % 2 == 0 { 1 } else { 1000 + i as u32 };
        }
        let mut d = [1u32; DSZ];
        for (i, c) in d.iter_mut().enumerate() {
            *c = if i % 2 == 0 { 3 } else { 77 };
        }
        let (bytes, _bits) = dhtgen(&ll, &d);
        assert!(bytes.len() <= DHT_MAX_BYTES);
    }

    #[test]
    fn rle_round_trips_lengths() {
        let lens: Vec<u8> = vec![5, 5, 5, 5, 5, 5, 5, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2];
        let tokens = rle_code_lengths(&lens);
        // decode the token stream back
        let mut out: Vec<u8> = Vec::new();
        for t in &tokens {
            match t.code {
                16 => {
                    let prev = *out.last().unwrap();
                    for _ in 0..t.extra + 3 {
                        out.push(prev);
                    }
                }
                17 => {
                    for _ in 0..t.extra + 3 {
                        out.push(0);
                    }
                }
                18 => {
                    for _ in 0..t.extra + 11 {
                        out.push(0);
                    }
                }
                c => out.push(c),
            }
        }
        assert_eq!(out, lens);
    }

    fn cmd_with_counts(f: impl Fn(usize) -> u32) -> Box<CommandBlock> {
        let mut cmd = CommandBlock::new_boxed();
        for i in 0..LLSZ + DSZ {
            cmd.cpb.out_lzcount[i] = f(i).to_be();
        }
        cmd
    }

    #[test]
    fn top_symbols_finds_the_two_hottest() {
        let mut cmd = cmd_with_counts(|i| match i {
            65 => 500,
            66 => 900,
            258 => 80,
            260 => 70,
            _ => 1,
        });
        let top = top_symbols(&mut cmd.cpb.out_lzcount);
        assert_eq!(top.lit, [66, 65]);
        assert_eq!(top.len, [258, 260]);
        // counts were byte-swapped in place
        assert_eq!(cmd.cpb.out_lzcount[66], 900);
    }

    #[test]
    fn default_request_copies_builtin() {
        let mut cache = DhtCache::new();
        let mut cmd = CommandBlock::new_boxed();
        cache.lookup(&mut cmd, DhtRequest::Default);
        assert!(cmd.cpb.in_dhtlen >= 42);
    }

    #[test]
    fn search_misses_then_hits() {
        let mut cache = DhtCache::new();
        let mut cmd = cmd_with_counts(|i| match i {
            97 => 800,
            98 => 400,
            257 => 90,
            259 => 50,
            _ => 1,
        });
        cmd.set_fc(FunctionCode::CompressResumeDhtCount);
        cache.lookup(&mut cmd, DhtRequest::Search);
        let first_len = cmd.cpb.in_dhtlen;
        assert!(first_len >= 42);

        // same histogram again: must hit and bump the use count
        let mut cmd2 = cmd_with_counts(|i| match i {
            97 => 801,
            98 => 399,
            257 => 91,
            259 => 51,
            _ => 1,
        });
        cache.lookup(&mut cmd2, DhtRequest::Search);
        assert_eq!(cmd2.cpb.in_dhtlen, first_len);
        let installed = (0..DHT_NUM_MAX).find(|&i| cache.use_count(i) == 2);
        assert!(installed.is_some());
    }

    #[test]
    fn invalidate_spares_builtins() {
        let mut cache = DhtCache::new();
        let mut cmd = cmd_with_counts(|i| if i == 10 { 100 } else { 1 });
        cache.lookup(&mut cmd, DhtRequest::Search);
        cache.lookup(&mut cmd, DhtRequest::Invalidate);
        assert_eq!(cache.use_count(0), -1);
        assert_eq!(cache.use_count(1), -1);
        assert!((DHT_NUM_BUILTIN..DHT_NUM_MAX).all(|i| cache.use_count(i) == 0));
    }

    #[test]
    fn gen_request_does_not_install() {
        let mut cache = DhtCache::new();
        let mut cmd = cmd_with_counts(|i| if i == 20 { 300 } else { 1 });
        cache.lookup(&mut cmd, DhtRequest::Gen);
        assert!((DHT_NUM_BUILTIN..DHT_NUM_MAX).all(|i| cache.use_count(i) == 0));
        assert!(cmd.cpb.in_dhtlen >= 42);
    }
}
