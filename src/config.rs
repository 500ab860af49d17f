use std::time::Duration;

/// Block-splitting strategy for compression.
///
/// `Fixed` forces fixed-Huffman blocks; `Default` lets the stream pick
/// dynamic tables from observed symbol statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Dynamic Huffman tables selected from observed symbol statistics.
    Default,
    /// Fixed Huffman tables only.
    Fixed,
}

/// Tunables shared by every stream opened against a device.
///
/// All former process globals live here and are handed to the constructors
/// explicitly; reading them from the environment or a configuration file is
/// the embedding application's business.
#[derive(Debug, Clone)]
pub struct Config {
    /// System page size used for fault-in touching.
    pub page_size: usize,
    /// Per-DDE byte cap on the deflate side; also sizes fifo_out.
    pub def_buf_size: u32,
    /// Per-DDE byte cap on the inflate side; also sizes fifo_in/fifo_out.
    pub inf_buf_size: u32,
    /// Source bytes handed to the engine per job, kept under the engine's
    /// suspend limit.
    pub per_job_len: u32,
    /// Inputs below this are staged with memcpy instead of an engine copy.
    pub soft_copy_threshold: u32,
    /// Compression collects input in fifo_in until this much is buffered.
    pub compress_threshold: u32,
    /// Length of a stored (btype=00) block emitted by the copy path.
    pub stored_block_len: u32,
    /// Deflate history window; the engine supports exactly 32 KiB.
    pub window_max: u32,
    /// Poll iterations of the status block before giving up.
    pub csb_poll_max: u64,
    /// Paste rejections tolerated before the submit fails.
    pub paste_retries: u32,
    /// Translation-fault resubmissions tolerated per job.
    pub pgfault_retries: u32,
    /// Wall-clock bound on a single job.
    pub timeout: Duration,
    /// Huffman table strategy for compression streams.
    pub strategy: Strategy,
    /// Bit 0 set: key the table cache on lengths as well as literals.
    pub dht_config: u32,
    /// Pin command blocks into memory (no-op unless the transport needs it).
    pub mlock_csb: bool,
    /// Intern one device handle per thread and reuse it across streams.
    pub reuse_device: bool,
    /// Count calls and byte volumes on the device.
    pub stats: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            page_size: 4096,
            def_buf_size: 1 << 20,
            inf_buf_size: 1 << 16,
            per_job_len: 1 << 20,
            soft_copy_threshold: 1024,
            compress_threshold: 10 * 1024,
            stored_block_len: 32768,
            window_max: 32768,
            csb_poll_max: 2_000_000,
            paste_retries: 5000,
            pgfault_retries: u32::MAX,
            timeout: Duration::from_secs(60),
            strategy: Strategy::Default,
            dht_config: 0,
            mlock_csb: false,
            reuse_device: true,
            stats: false,
        }
    }
}

impl Config {
    /// fifo_in capacity for deflate streams; half-used invariant applies.
    pub(crate) fn deflate_fifo_in_len(&self) -> usize {
        1 << 17
    }

    /// fifo_out capacity for deflate streams.
    pub(crate) fn deflate_fifo_out_len(&self) -> usize {
        (self.def_buf_size as usize) * 2
    }

    pub(crate) fn inflate_fifo_in_len(&self) -> usize {
        (self.soft_copy_threshold as usize) * 2
    }
}
