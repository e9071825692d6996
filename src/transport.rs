//! The two wire attachments: Modbus RTU on a shared serial line and Modbus
//! TCP to a network peer.
//!
//! Both build requests and parse responses through `rmodbus`; this module
//! only moves bytes over an [`embedded_io`] stream and maps outcomes onto
//! the [`ReadStatus`] taxonomy.

use core::cell::RefCell;
use core::net::SocketAddrV4;

use embedded_io::Error as _;

use crate::device::{Device, DeviceScales, LongReadCache};
use crate::status::ReadStatus;
use crate::value::{LONG_READ_REGS, RegisterSpace};

/// Frame buffer size: a full 64-register payload plus framing fits with
/// room to spare.
pub const FRAME_CAPACITY: usize = 256;

/// Where a network device's current target address comes from; typically a
/// handle into the installation's parameter store. Re-resolved before every
/// transaction because an operator can repoint a device at runtime.
pub trait AddressSource {
    fn current_address(&self) -> SocketAddrV4;
}

/// A fixed address is the simplest source.
impl AddressSource for SocketAddrV4 {
    fn current_address(&self) -> SocketAddrV4 {
        *self
    }
}

impl<T: AddressSource + ?Sized> AddressSource for &T {
    fn current_address(&self) -> SocketAddrV4 {
        (**self).current_address()
    }
}

/// Point-to-point streams whose peer can move at runtime.
///
/// Called with the freshly resolved address before every transaction. An
/// implementation reconnects when the address changed or the link is dead,
/// and is otherwise a cheap no-op.
pub trait Retarget {
    type RetargetError: core::fmt::Debug;

    fn retarget(&mut self, addr: SocketAddrV4) -> Result<(), Self::RetargetError>;
}

#[derive(Debug, Clone, Copy)]
enum Framing {
    Rtu,
    Tcp,
}

impl Framing {
    fn proto(self) -> rmodbus::ModbusProto {
        match self {
            Framing::Rtu => rmodbus::ModbusProto::Rtu,
            Framing::Tcp => rmodbus::ModbusProto::TcpUdp,
        }
    }

    /// Total response length, once enough of the header has arrived to
    /// know it.
    fn expected_len(self, buf: &[u8]) -> Option<usize> {
        match self {
            Framing::Rtu => {
                if buf.len() < 3 {
                    return None;
                }
                if buf[1] & 0x80 != 0 {
                    // unit + function + exception code + CRC
                    Some(5)
                } else {
                    // unit + function + byte count + payload + CRC
                    Some(5 + buf[2] as usize)
                }
            }
            Framing::Tcp => {
                if buf.len() < 6 {
                    return None;
                }
                // MBAP length field counts everything after byte 6.
                Some(6 + u16::from_be_bytes([buf[4], buf[5]]) as usize)
            }
        }
    }

    /// Unit id and function code of a response frame.
    fn header(self, buf: &[u8]) -> Option<(u8, u8)> {
        match self {
            Framing::Rtu => Some((*buf.first()?, *buf.get(1)?)),
            Framing::Tcp => Some((*buf.get(6)?, *buf.get(7)?)),
        }
    }

    /// Exception code of a response whose function byte has bit 7 set.
    fn exception_code(self, buf: &[u8]) -> Option<u8> {
        match self {
            Framing::Rtu => buf.get(2).copied(),
            Framing::Tcp => buf.get(8).copied(),
        }
    }
}

/// Accumulate one response frame, chunk by chunk, until its header says it
/// is complete. A timeout after some bytes may still be a complete frame;
/// the parser gets the final say.
fn collect_response<S: embedded_io::Read, const L: usize>(
    line: &mut S,
    framing: Framing,
    buf: &mut heapless::Vec<u8, L>,
) -> Result<(), ReadStatus> {
    let mut chunk = [0u8; 8];
    loop {
        match line.read(&mut chunk) {
            Ok(0) => {
                // Stream closed.
                return if buf.is_empty() {
                    Err(ReadStatus::Timeout)
                } else {
                    Ok(())
                };
            }
            Ok(n) => {
                if buf.extend_from_slice(&chunk[..n]).is_err() {
                    // A response this oversized is garbage.
                    return Err(ReadStatus::FrameCheck);
                }
                if let Some(total) = framing.expected_len(buf) {
                    if buf.len() >= total {
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                let kind = e.kind();
                if matches!(
                    kind,
                    embedded_io::ErrorKind::TimedOut | embedded_io::ErrorKind::Other
                ) && !buf.is_empty()
                {
                    return Ok(());
                }
                log::debug!("transport read failed: {kind:?}");
                return Err(ReadStatus::Timeout);
            }
        }
    }
}

/// One read transaction: generate the request, send it, collect and verify
/// the response, copy `count` words into `dst`.
fn read_words<S, const L: usize>(
    line: &mut S,
    framing: Framing,
    unit_id: u8,
    space: RegisterSpace,
    address: u16,
    count: u16,
    dst: &mut [u16],
) -> ReadStatus
where
    S: embedded_io::Read + embedded_io::Write,
{
    let mut req = rmodbus::client::ModbusRequest::new(unit_id, framing.proto());
    let mut frame: heapless::Vec<u8, L> = heapless::Vec::new();

    let function = match space {
        RegisterSpace::Input => 0x04,
        // Long-read channels carry `None` but their windows live in the
        // holding space.
        RegisterSpace::Holding | RegisterSpace::None => 0x03,
    };
    let generated = match space {
        RegisterSpace::Input => req.generate_get_inputs(address, count, &mut frame),
        RegisterSpace::Holding | RegisterSpace::None => {
            req.generate_get_holdings(address, count, &mut frame)
        }
    };
    if generated.is_err() {
        // The request never left this station; its parameters were out of
        // range for the protocol.
        return ReadStatus::IllegalDataValue;
    }

    if let Err(e) = line.write_all(&frame) {
        log::debug!("transport write failed: {:?}", e.kind());
        return ReadStatus::Timeout;
    }

    frame.clear();
    if let Err(status) = collect_response(line, framing, &mut frame) {
        return status;
    }

    let Some((unit, func)) = framing.header(&frame) else {
        return ReadStatus::FrameCheck;
    };
    if unit != unit_id {
        return ReadStatus::InvalidUnitId;
    }
    if func & 0x80 != 0 {
        return match framing.exception_code(&frame) {
            Some(code) => ReadStatus::from_exception_code(code),
            None => ReadStatus::FrameCheck,
        };
    }
    if func != function {
        return ReadStatus::InvalidFunction;
    }

    let mut parsed: heapless::Vec<u16, LONG_READ_REGS> = heapless::Vec::new();
    if req.parse_u16(&frame, &mut parsed).is_err() {
        return ReadStatus::FrameCheck;
    }
    let count = count as usize;
    if parsed.len() < count || dst.len() < count {
        return ReadStatus::FrameCheck;
    }
    dst[..count].copy_from_slice(&parsed[..count]);
    ReadStatus::Success
}

/// Charge or diversion controller on the shared RS-485 line.
///
/// The line is multi-drop: several controllers answer on one serial port,
/// told apart by unit id, so every device on it borrows the same
/// `RefCell`ed stream. The poll loop runs one transaction at a time (one
/// logical poller), which keeps the borrow uncontended.
pub struct RtuDevice<'a, S: embedded_io::Read + embedded_io::Write, const L: usize = FRAME_CAPACITY>
{
    name: &'static str,
    unit_id: u8,
    line: &'a RefCell<S>,
    scales: DeviceScales,
    cache: LongReadCache,
}

impl<'a, S: embedded_io::Read + embedded_io::Write, const L: usize> RtuDevice<'a, S, L> {
    pub fn new(line: &'a RefCell<S>, unit_id: u8, name: &'static str) -> Self {
        RtuDevice {
            name,
            unit_id,
            line,
            scales: DeviceScales::default(),
            cache: LongReadCache::new(),
        }
    }

    /// Install the multipliers for the scaled data kinds, usually computed
    /// from the controller's per-unit registers via
    /// [`per_unit_scale`](crate::value::per_unit_scale).
    pub fn set_scales(&mut self, scales: DeviceScales) {
        self.scales = scales;
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> Device for RtuDevice<'_, S, L> {
    fn read_registers(
        &mut self,
        space: RegisterSpace,
        address: u16,
        count: u16,
        dst: &mut [u16],
    ) -> ReadStatus {
        let Ok(mut line) = self.line.try_borrow_mut() else {
            // Re-entered poll loop; the line is mid-transaction.
            log::debug!("{}: serial line busy", self.name);
            return ReadStatus::Timeout;
        };
        let status = read_words::<S, L>(
            &mut *line,
            Framing::Rtu,
            self.unit_id,
            space,
            address,
            count,
            dst,
        );
        if !status.is_ok() {
            log::debug!(
                "{}: read of {count} regs at {address:#06x}: {status}",
                self.name
            );
        }
        status
    }

    fn name(&self) -> &str {
        self.name
    }

    fn scales(&self) -> DeviceScales {
        self.scales
    }

    fn cache(&self) -> &LongReadCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut LongReadCache {
        &mut self.cache
    }
}

/// Network-attached device, spoken to over Modbus TCP.
///
/// The peer address lives in an external parameter store and can be changed
/// by an operator while the plant runs, so it is re-resolved and pushed to
/// the stream before every transaction.
pub struct TcpDevice<S, A, const L: usize = FRAME_CAPACITY>
where
    S: embedded_io::Read + embedded_io::Write + Retarget,
    A: AddressSource,
{
    name: &'static str,
    unit_id: u8,
    link: S,
    source: A,
    scales: DeviceScales,
    cache: LongReadCache,
}

impl<S, A, const L: usize> TcpDevice<S, A, L>
where
    S: embedded_io::Read + embedded_io::Write + Retarget,
    A: AddressSource,
{
    pub fn new(link: S, source: A, unit_id: u8, name: &'static str) -> Self {
        TcpDevice {
            name,
            unit_id,
            link,
            source,
            scales: DeviceScales::default(),
            cache: LongReadCache::new(),
        }
    }

    /// Install the multipliers for the scaled data kinds. Network devices
    /// mostly publish pre-scaled registers read with channel-local scales,
    /// so the default unit factors often stand.
    pub fn set_scales(&mut self, scales: DeviceScales) {
        self.scales = scales;
    }
}

impl<S, A, const L: usize> Device for TcpDevice<S, A, L>
where
    S: embedded_io::Read + embedded_io::Write + Retarget,
    A: AddressSource,
{
    fn read_registers(
        &mut self,
        space: RegisterSpace,
        address: u16,
        count: u16,
        dst: &mut [u16],
    ) -> ReadStatus {
        let addr = self.source.current_address();
        if let Err(e) = self.link.retarget(addr) {
            log::debug!("{}: cannot reach {addr}: {e:?}", self.name);
            return ReadStatus::Timeout;
        }
        let status = read_words::<S, L>(
            &mut self.link,
            Framing::Tcp,
            self.unit_id,
            space,
            address,
            count,
            dst,
        );
        if !status.is_ok() {
            log::debug!(
                "{}: read of {count} regs at {address:#06x}: {status}",
                self.name
            );
        }
        status
    }

    fn name(&self) -> &str {
        self.name
    }

    fn scales(&self) -> DeviceScales {
        self.scales
    }

    fn cache(&self) -> &LongReadCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut LongReadCache {
        &mut self.cache
    }
}
