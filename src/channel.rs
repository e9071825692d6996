//! A channel is one published measurement: which device and registers to
//! read, how to decode the words, and the latest outcome of doing so.

use crate::device::{Device, DeviceId, LongReadCache};
use crate::error::{Error, Result};
use crate::status::ReadStatus;
use crate::value::{
    DISPLAY_CAPACITY, DataKind, LONG_READ_REGS, NAN_TEXT, RegisterSpace, TEXT_CAPACITY, Value,
    decode,
};

/// One measurement slot in a channel set.
///
/// A channel keeps its previous decoded value across failed polls; only the
/// exported text flips to the failure marker. Telemetry readers thus see
/// either the latest good reading or an explicit [`NAN_TEXT`], never a
/// stale number presented as fresh.
#[derive(Debug)]
pub struct Channel {
    device: DeviceId,
    space: RegisterSpace,
    address: u16,
    kind: DataKind,
    /// Registers per transaction. Fixed by the kind for every channel
    /// except long reads, which may be narrowed to the device's window.
    regs: u16,
    scale: f32,
    name: &'static str,
    label: &'static str,
    units: &'static str,
    value: Option<Value>,
    status: ReadStatus,
    display: heapless::String<DISPLAY_CAPACITY>,
}

impl Channel {
    /// A channel publishing `name` from `count` registers at `address` on
    /// the device `device` points at.
    ///
    /// Text kinds longer than the text buffer are rejected here rather
    /// than truncated at decode time.
    pub fn new(
        device: DeviceId,
        space: RegisterSpace,
        address: u16,
        kind: DataKind,
        name: &'static str,
        label: &'static str,
        units: &'static str,
    ) -> Result<Self> {
        if let DataKind::Text { len } = kind {
            if len as usize > TEXT_CAPACITY {
                return Err(Error::TextTooLong);
            }
        }
        Ok(Channel {
            device,
            space,
            address,
            kind,
            regs: kind.register_count(),
            scale: 1.0,
            name,
            label,
            units,
            value: None,
            status: ReadStatus::default(),
            display: heapless::String::new(),
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn space(&self) -> RegisterSpace {
        self.space
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Registers the next transaction will move.
    pub fn register_count(&self) -> u16 {
        self.regs
    }

    /// Telemetry key, unique within a set.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Human-readable description.
    pub fn label(&self) -> &str {
        self.label
    }

    pub fn units(&self) -> &str {
        self.units
    }

    /// Latest decoded value. Stays in place across failed polls and is
    /// never set for long-read channels.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Outcome of the most recent poll.
    pub fn status(&self) -> ReadStatus {
        self.status
    }

    /// The exported text: empty before the first poll, the rendered value
    /// after a good one, [`NAN_TEXT`] after a failed one.
    pub fn value_text(&self) -> &str {
        &self.display
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Multiplier applied by the channel-scaled kinds, 1.0 unless set.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    /// Narrow a long-read channel to the device's actual contiguous
    /// window. Clamped to the cache size; ignored on other kinds.
    pub fn set_long_read_span(&mut self, span: u16) {
        if self.kind != DataKind::LongRead {
            log::debug!("{}: span override on a non-block channel", self.name);
            return;
        }
        self.regs = span.clamp(1, LONG_READ_REGS as u16);
    }

    /// Whether a cached poll of this channel could be answered from
    /// `cache`. Long reads refill the cache rather than consume it, and
    /// input registers are a different table from the cached holdings.
    pub fn covered_by(&self, cache: &LongReadCache) -> bool {
        self.kind != DataKind::LongRead
            && self.space == RegisterSpace::Holding
            && cache.covers(self.address, self.regs)
    }

    /// Poll this channel once.
    ///
    /// Long-read channels always go to the wire and refill the device
    /// cache. For the rest, `use_cache` selects between decoding out of
    /// the cache window and issuing a dedicated transaction. The returned
    /// status is also recorded on the channel.
    ///
    /// A cached poll consumes whatever the device's long-read channel last
    /// left behind: the caller must order the long read before its
    /// dependents within a cycle, or they will decode the previous
    /// cycle's window.
    pub fn read<D: Device + ?Sized>(&mut self, device: &mut D, use_cache: bool) -> ReadStatus {
        let status = if self.kind == DataKind::LongRead {
            self.read_long(device)
        } else if use_cache {
            self.read_cached(&*device)
        } else {
            self.read_direct(device)
        };
        self.status = status;
        status
    }

    fn read_long<D: Device + ?Sized>(&mut self, device: &mut D) -> ReadStatus {
        let mut words = [0u16; LONG_READ_REGS];
        let status = device.read_registers(self.space, self.address, self.regs, &mut words);
        if status.is_ok() {
            device
                .cache_mut()
                .store(self.address, &words[..self.regs as usize]);
        } else {
            // Dependent channels must not decode yesterday's window.
            device.cache_mut().invalidate();
            log::warn!(
                "{}: block read of {} regs at {:#06x} failed: {status}",
                device.name(),
                self.regs,
                self.address
            );
            self.mark_failed();
        }
        status
    }

    fn read_cached<D: Device + ?Sized>(&mut self, device: &D) -> ReadStatus {
        let cache = device.cache();
        if !cache.valid() {
            self.mark_failed();
            return ReadStatus::CacheUnavailable;
        }
        let Some(window) = cache.window(self.address, self.regs) else {
            self.mark_failed();
            return ReadStatus::IllegalDataAddress;
        };
        match decode(self.kind, window, device.scales(), self.scale) {
            Some(value) => {
                self.accept(value);
                ReadStatus::Success
            }
            None => {
                // The window is exactly `regs` words and `regs` is the
                // kind's own register count, so the decoder cannot run
                // short here. FrameCheck stays reserved for wire-level
                // corruption.
                debug_assert!(false, "decode refused a full window");
                self.mark_failed();
                ReadStatus::IllegalDataValue
            }
        }
    }

    fn read_direct<D: Device + ?Sized>(&mut self, device: &mut D) -> ReadStatus {
        let mut words = [0u16; LONG_READ_REGS];
        let status = device.read_registers(self.space, self.address, self.regs, &mut words);
        if !status.is_ok() {
            self.mark_failed();
            return status;
        }
        match decode(
            self.kind,
            &words[..self.regs as usize],
            device.scales(),
            self.scale,
        ) {
            Some(value) => {
                self.accept(value);
                ReadStatus::Success
            }
            None => {
                debug_assert!(false, "decode refused {} fresh words", self.regs);
                self.mark_failed();
                ReadStatus::IllegalDataValue
            }
        }
    }

    fn accept(&mut self, value: Value) {
        value.render(&mut self.display);
        self.value = Some(value);
    }

    fn mark_failed(&mut self) {
        self.display.clear();
        let _ = self.display.push_str(NAN_TEXT);
    }
}
