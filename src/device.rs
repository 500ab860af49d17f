//! Device handles: the seam between the streams and whatever executes the
//! command ABI — a real accelerator window opened by a VAS transport, or the
//! built-in software engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::cmd::CommandBlock;
#[cfg(feature = "software")]
use crate::config::Config;
use crate::map::HandleMap;

/// A paste window: copy a request block into the engine's paste buffer and
/// commit it. `paste` returns false when the engine queue rejected the
/// submission and the caller should back off and retry.
///
/// Implementations write the completion into the command's status block;
/// hardware does so asynchronously, the software engine before returning.
pub(crate) trait PasteWindow: Send + Sync {
    fn paste(&self, cmd: &mut CommandBlock) -> bool;
}

/// Call and byte-volume counters, kept when [`Config::stats`] is on.
#[derive(Debug, Default, Clone)]
#[allow(missing_docs)]
pub struct Stats {
    pub deflate_init: u64,
    pub deflate: u64,
    pub deflate_bytes: u64,
    pub deflate_end: u64,
    pub inflate_init: u64,
    pub inflate: u64,
    pub inflate_bytes: u64,
    pub inflate_end: u64,
    pub dht_hits: u64,
    pub dht_computed: u64,
}

/// An open engine. Streams share a device through reference counting; the
/// window itself serializes pastes, each stream brings its own command
/// block.
pub struct Device {
    window: Box<dyn PasteWindow>,
    /// Written by the out-of-band SIGSEGV handler when the engine faults on
    /// a user page; observed inside the submit poll loop. Zero when clear.
    fault_addr: AtomicUsize,
    stats: Mutex<Stats>,
}

impl Device {
    pub(crate) fn with_window(window: Box<dyn PasteWindow>) -> Arc<Device> {
        Arc::new(Device {
            window,
            fault_addr: AtomicUsize::new(0),
            stats: Mutex::new(Stats::default()),
        })
    }

    /// Open a device backed by the software engine.
    #[cfg(feature = "software")]
    pub fn software() -> Arc<Device> {
        Device::with_window(Box::new(crate::soft::SoftEngine::new()))
    }

    /// Open a software device, reusing one handle per thread when the
    /// configuration allows it.
    #[cfg(feature = "software")]
    pub fn software_shared(config: &Config) -> Arc<Device> {
        if !config.reuse_device {
            return Device::software();
        }
        let key = thread_key();
        let saved = saved_devices();
        if let Some(dev) = saved.get(key) {
            return dev;
        }
        let dev = Device::software();
        saved.put(key, dev.clone());
        dev
    }

    /// Drop this thread's interned handle, if any.
    pub fn close_saved() {
        let _ = saved_devices().remove(thread_key());
    }

    pub(crate) fn paste(&self, cmd: &mut CommandBlock) -> bool {
        self.window.paste(cmd)
    }

    /// Entry point for the embedding application's SIGSEGV handler: record
    /// the faulting address so the poll loop can restart the job.
    pub fn record_fault(&self, addr: usize) {
        self.fault_addr.store(addr, Ordering::Release);
    }

    pub(crate) fn take_fault(&self) -> Option<usize> {
        let addr = self.fault_addr.swap(0, Ordering::AcqRel);
        if addr == 0 {
            None
        } else {
            Some(addr)
        }
    }

    /// A snapshot of the device's call counters.
    pub fn stats(&self) -> Stats {
        self.stats.lock().unwrap().clone()
    }

    pub(crate) fn count<F: FnOnce(&mut Stats)>(&self, enabled: bool, f: F) {
        if enabled {
            f(&mut self.stats.lock().unwrap());
        }
    }
}

fn saved_devices() -> &'static HandleMap<Arc<Device>> {
    static SAVED: OnceLock<HandleMap<Arc<Device>>> = OnceLock::new();
    SAVED.get_or_init(HandleMap::new)
}

/// A stable pointer-sized key for the current thread.
fn thread_key() -> usize {
    thread_local! {
        static KEY: u8 = 0;
    }
    KEY.with(|k| k as *const u8 as usize)
}

#[cfg(all(test, feature = "software"))]
mod tests {
    use super::*;

    #[test]
    fn shared_handle_is_interned_per_thread() {
        let cfg = Config::default();
        let a = Device::software_shared(&cfg);
        let b = Device::software_shared(&cfg);
        assert!(Arc::ptr_eq(&a, &b));

        let other = std::thread::spawn(move || {
            let c = Device::software_shared(&Config::default());
            !Arc::ptr_eq(&a, &c)
        })
        .join()
        .unwrap();
        assert!(other);
        Device::close_saved();
    }

    #[test]
    fn reuse_can_be_disabled() {
        let cfg = Config {
            reuse_device: false,
            ..Config::default()
        };
        let a = Device::software_shared(&cfg);
        let b = Device::software_shared(&cfg);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn fault_slot_is_take_once() {
        let dev = Device::software();
        assert_eq!(dev.take_fault(), None);
        dev.record_fault(0x1234);
        assert_eq!(dev.take_fault(), Some(0x1234));
        assert_eq!(dev.take_fault(), None);
    }
}
