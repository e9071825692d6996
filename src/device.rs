use crate::status::ReadStatus;
use crate::value::{LONG_READ_REGS, RegisterSpace};

/// Position of a device in the caller's device list.
///
/// Channels carry one of these instead of borrowing the device, so channel
/// tables and the devices they read through can be owned and mutated
/// independently by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u8);

/// Per-device multipliers for the scaled data kinds.
///
/// A fresh device reports raw counts until the application has read the
/// device's per-unit registers and installed the real factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceScales {
    pub current: f32,
    pub voltage: f32,
}

impl DeviceScales {
    pub const fn new(current: f32, voltage: f32) -> Self {
        DeviceScales { current, voltage }
    }
}

impl Default for DeviceScales {
    fn default() -> Self {
        DeviceScales::new(1.0, 1.0)
    }
}

/// Words of the most recent bulk read on one device, with the address the
/// read started at.
///
/// Extraction always offsets against the stored base, so device families
/// whose bulk windows start at different addresses share the same code path.
#[derive(Debug, Default)]
pub struct LongReadCache {
    words: heapless::Vec<u16, LONG_READ_REGS>,
    base: u16,
    valid: bool,
}

impl LongReadCache {
    pub const fn new() -> Self {
        LongReadCache {
            words: heapless::Vec::new(),
            base: 0,
            valid: false,
        }
    }

    /// True only between a successful bulk read and the next failed one.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Address the cached window starts at. Meaningless while invalid.
    pub fn base_address(&self) -> u16 {
        self.base
    }

    /// Replace the contents after a successful bulk read. Words beyond the
    /// buffer capacity are dropped; transactions are sized to the capacity,
    /// so in practice nothing is.
    pub fn store(&mut self, base: u16, words: &[u16]) {
        self.words.clear();
        let take = words.len().min(LONG_READ_REGS);
        // Cannot fail: the buffer was just cleared and `take` is clamped.
        let _ = self.words.extend_from_slice(&words[..take]);
        self.base = base;
        self.valid = true;
    }

    /// Drop freshness after a failed bulk read. The stale words stay in the
    /// buffer but are never served until the next successful [`store`].
    ///
    /// [`store`]: LongReadCache::store
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// The cached words covering `count` registers at absolute `address`, or
    /// `None` when the cache is stale or the range falls outside the window.
    pub fn window(&self, address: u16, count: u16) -> Option<&[u16]> {
        if !self.valid {
            return None;
        }
        let offset = address.checked_sub(self.base)? as usize;
        let end = offset.checked_add(count as usize)?;
        self.words.get(offset..end)
    }

    /// Whether a fresh cache covers `count` registers at `address`. Poll
    /// loops use this to decide between a cached and a direct read.
    pub fn covers(&self, address: u16, count: u16) -> bool {
        self.window(address, count).is_some()
    }
}

/// Common contract of the two device attachments (serial multi-drop and
/// network point-to-point).
///
/// [`read_registers`] is the only operation that touches the wire; the rest
/// is plain state access. Network implementations re-resolve their target
/// address at the start of every transaction, because an operator can
/// repoint a device at runtime without restarting the poll loop.
///
/// [`read_registers`]: Device::read_registers
pub trait Device {
    /// Issue one read transaction and copy the payload into `dst[..count]`.
    ///
    /// `dst` must hold at least `count` words. [`RegisterSpace::None`] reads
    /// the holding space, where these devices keep their bulk windows.
    fn read_registers(
        &mut self,
        space: RegisterSpace,
        address: u16,
        count: u16,
        dst: &mut [u16],
    ) -> ReadStatus;

    /// Stable device name for logs and telemetry.
    fn name(&self) -> &str;

    fn scales(&self) -> DeviceScales;

    fn cache(&self) -> &LongReadCache;

    fn cache_mut(&mut self) -> &mut LongReadCache;
}
