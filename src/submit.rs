//! Job submission: paste the request with bounded retries, poll the status
//! block until it goes valid, and classify the completion code.

use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::cmd::{CommandBlock, StatusBlock};
use crate::config::Config;
use crate::ddl::DdeList;
use crate::device::Device;
use crate::error::{CompCode, SubmitError};

/// Paste attempts that busy-wait before the loop starts sleeping.
const PASTE_SPIN_ATTEMPTS: u32 = 10;
/// Accumulated wait after which the poll loop starts micro-sleeping.
const POLL_SLEEP_THRESHOLD: Duration = Duration::from_micros(250);
const POLL_SLEEP_MAX: Duration = Duration::from_millis(1);

enum Wait {
    Valid,
    /// A fault address was delivered out of band; the job must be repasted
    /// after the page is made resident.
    Fault(usize),
    Timeout,
}

/// Submit one job and wait for its completion.
///
/// The descriptor heads are copied into the request block, the status
/// subfield is cleared, and the request is pasted to the window. Rejected
/// pastes back off (short busy-waits first, then 1 µs sleeps) within the
/// configured budget. Once accepted, the status block is polled until the
/// valid flag is set or the timeout fires. Translation faults observed
/// through the device's fault slot are healed by touching the page and
/// repasting.
pub(crate) fn submit_job(
    dev: &Device,
    ddl_in: &DdeList,
    ddl_out: &DdeList,
    cmd: &mut CommandBlock,
    cfg: &Config,
) -> Result<CompCode, SubmitError> {
    cmd.crb.csb.clear();
    cmd.crb.source_dde = ddl_in.head();
    cmd.crb.target_dde = ddl_out.head();
    cmd.crb.csb_address = &cmd.crb.csb as *const StatusBlock as u64;

    // the engine reports source bytes here; make stale values impossible
    cmd.cpb.out_spbc_comp = 0;
    cmd.cpb.out_spbc_comp_with_count = 0;
    cmd.cpb.out_spbc_decomp = 0;

    trace!(
        fc = cmd.crb.gzip_fc,
        src = ddl_in.total(),
        dst = ddl_out.total(),
        "submit"
    );

    let mut rejects: u32 = 0;
    loop {
        fence(Ordering::SeqCst);
        let accepted = dev.paste(cmd);
        fence(Ordering::SeqCst);

        if !accepted {
            rejects += 1;
            if rejects > cfg.paste_retries {
                warn!(rejects, "paste budget exhausted");
                return Err(SubmitError::PasteBudget(rejects));
            }
            if rejects % 1000 == 0 {
                warn!(rejects, "paste still rejected");
            }
            if rejects <= PASTE_SPIN_ATTEMPTS {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(Duration::from_micros(1));
            }
            continue;
        }

        match wait_for_csb(dev, &cmd.crb.csb, cfg) {
            Wait::Valid => {
                fence(Ordering::SeqCst);
                let cc = CompCode::from_raw(cmd.crb.csb.cc);
                trace!(cc = cmd.crb.csb.cc, tpbc = cmd.crb.csb.tpbc, "complete");
                return Ok(cc);
            }
            Wait::Fault(addr) => {
                // force the kernel to install the page, then resubmit
                trace!(addr, "touching faulted page");
                touch_fault_address(addr);
                continue;
            }
            Wait::Timeout => {
                warn!("status block never went valid");
                return Err(SubmitError::Timeout);
            }
        }
    }
}

fn wait_for_csb(dev: &Device, csb: &StatusBlock, cfg: &Config) -> Wait {
    let start = Instant::now();
    let mut polls: u64 = 0;

    while !csb.is_valid() {
        // short spin between checks
        for _ in 0..100 {
            std::hint::spin_loop();
        }
        polls += 1;

        if let Some(addr) = dev.take_fault() {
            return Wait::Fault(addr);
        }

        let elapsed = start.elapsed();
        if elapsed >= cfg.timeout || polls >= cfg.csb_poll_max {
            return Wait::Timeout;
        }
        if elapsed > POLL_SLEEP_THRESHOLD {
            std::thread::sleep(POLL_SLEEP_MAX.min(elapsed / 4));
        }
    }
    Wait::Valid
}

fn touch_fault_address(addr: usize) {
    unsafe {
        let p = addr as *mut u8;
        let x = std::ptr::read_volatile(p);
        std::ptr::write_volatile(p, x);
    }
}

#[cfg(all(test, feature = "software"))]
mod tests {
    use super::*;
    use crate::cmd::FunctionCode;

    #[test]
    fn wrap_job_round_trips_through_the_window() {
        let dev = Device::software();
        let cfg = Config::default();
        let src = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut dst = vec![0u8; src.len()];

        let mut cmd = CommandBlock::new_boxed();
        cmd.set_fc(FunctionCode::Wrap);

        let mut ddl_in = DdeList::new(5);
        let mut ddl_out = DdeList::new(4);
        ddl_in.append(src.as_ptr(), src.len()).unwrap();
        ddl_out.append(dst.as_mut_ptr(), dst.len()).unwrap();

        let cc = submit_job(&dev, &ddl_in, &ddl_out, &mut cmd, &cfg).unwrap();
        assert_eq!(cc, CompCode::Ok);
        assert_eq!(dst, src);
        assert_eq!(cmd.crb.csb.tpbc as usize, src.len());
        assert_eq!(cmd.cpb.out_crc, crate::checksum::crc32(0, &src));
        assert_eq!(cmd.cpb.out_adler, crate::checksum::adler32(1, &src));
    }

    #[test]
    fn poll_times_out_when_nothing_completes() {
        struct DeafWindow;
        impl crate::device::PasteWindow for DeafWindow {
            fn paste(&self, _cmd: &mut CommandBlock) -> bool {
                true // accepted, but never completes
            }
        }
        let dev = Device::with_window(Box::new(DeafWindow));
        let cfg = Config {
            timeout: Duration::from_millis(20),
            csb_poll_max: 50,
            ..Config::default()
        };
        let mut cmd = CommandBlock::new_boxed();
        cmd.set_fc(FunctionCode::Wrap);
        let ddl_in = DdeList::new(5);
        let ddl_out = DdeList::new(4);
        let err = submit_job(&dev, &ddl_in, &ddl_out, &mut cmd, &cfg).unwrap_err();
        assert!(matches!(err, SubmitError::Timeout));
    }

    #[test]
    fn rejected_pastes_exhaust_the_budget() {
        struct BusyWindow;
        impl crate::device::PasteWindow for BusyWindow {
            fn paste(&self, _cmd: &mut CommandBlock) -> bool {
                false
            }
        }
        let dev = Device::with_window(Box::new(BusyWindow));
        let cfg = Config {
            paste_retries: 25,
            ..Config::default()
        };
        let mut cmd = CommandBlock::new_boxed();
        let ddl_in = DdeList::new(5);
        let ddl_out = DdeList::new(4);
        let err = submit_job(&dev, &ddl_in, &ddl_out, &mut cmd, &cfg).unwrap_err();
        assert!(matches!(err, SubmitError::PasteBudget(_)));
    }
}
