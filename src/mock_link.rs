//! Test doubles used by the unit tests: a mock byte stream standing in for
//! the serial line or TCP socket, frame builders for canned responses, and
//! a scripted [`Device`] for exercising channels without any wire at all.

use core::net::SocketAddrV4;

use crate::device::{Device, DeviceScales, LongReadCache};
use crate::status::ReadStatus;
use crate::transport::Retarget;
use crate::value::{LONG_READ_REGS, RegisterSpace};

/// Builds a response frame from a captured request. Lets a test answer
/// requests whose exact bytes it cannot predict, such as the transaction
/// id a TCP request carries.
pub type Responder = fn(&[u8]) -> heapless::Vec<u8, 256>;

/// Mock byte stream used in place of a serial port or TCP socket.
pub struct MockLink {
    /// Buffer capturing data written to the link
    write_buffer: heapless::Vec<u8, 256>,
    /// Pre-configured response data to be read back
    read_buffer: heapless::Vec<u8, 256>,
    /// Current position in the read buffer
    read_position: usize,
    /// Generates a response from the latest unanswered request
    responder: Option<Responder>,
    /// Write buffer offset of the first request the responder has not seen
    responded_upto: usize,
    /// Every address pushed through [`Retarget`]
    retargets: heapless::Vec<SocketAddrV4, 8>,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
    /// Flag to simulate an unreachable peer
    should_error_on_retarget: bool,
}

#[derive(Debug)]
pub enum MockLinkError {
    /// Simulated buffer overflow
    BufferOverflow,
    /// Generic simulated error for testing
    SimulatedError,
    /// Would block - no data available
    WouldBlock,
    /// Simulated unreachable peer
    Unreachable,
}

impl core::fmt::Display for MockLinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            MockLinkError::BufferOverflow => "mock buffer full",
            MockLinkError::SimulatedError => "simulated link fault",
            MockLinkError::WouldBlock => "no data queued",
            MockLinkError::Unreachable => "peer unreachable",
        })
    }
}

// `embedded_io::Error` is bounded on `core::error::Error`.
impl core::error::Error for MockLinkError {}

impl embedded_io::Error for MockLinkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockLinkError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockLinkError::SimulatedError => embedded_io::ErrorKind::Other,
            MockLinkError::WouldBlock => embedded_io::ErrorKind::Other,
            MockLinkError::Unreachable => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockLink {
    type Error = MockLinkError;
}

impl embedded_io::Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockLinkError::SimulatedError);
        }

        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockLinkError::BufferOverflow)?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockLinkError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockLinkError::SimulatedError);
        }

        if self.read_position >= self.read_buffer.len() {
            self.run_responder();
        }
        if self.read_position >= self.read_buffer.len() {
            return Err(MockLinkError::WouldBlock);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = core::cmp::min(buf.len(), available_bytes);

        buf[..bytes_to_read]
            .copy_from_slice(&self.read_buffer[self.read_position..][..bytes_to_read]);

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl Retarget for MockLink {
    type RetargetError = MockLinkError;

    fn retarget(&mut self, addr: SocketAddrV4) -> Result<(), Self::RetargetError> {
        if self.should_error_on_retarget {
            return Err(MockLinkError::Unreachable);
        }
        let _ = self.retargets.push(addr);
        Ok(())
    }
}

impl MockLink {
    /// Create a new MockLink instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            responder: None,
            responded_upto: 0,
            retargets: heapless::Vec::new(),
            should_error_on_write: false,
            should_error_on_read: false,
            should_error_on_retarget: false,
        }
    }

    /// Set the data that will be returned when read() is called
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockLinkError> {
        self.read_buffer.clear();
        self.read_position = 0;

        self.read_buffer
            .extend_from_slice(data)
            .map_err(|_| MockLinkError::BufferOverflow)?;

        Ok(())
    }

    /// Install a responder that answers each captured request once
    pub fn set_responder(&mut self, responder: Responder) {
        self.responder = Some(responder);
    }

    /// Get a reference to the data that was written to this mock link
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Every address pushed through [`Retarget`], in order
    pub fn retargets(&self) -> &[SocketAddrV4] {
        &self.retargets
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }

    /// Configure whether retargeting should fail with an error
    pub fn set_retarget_error(&mut self, should_error: bool) {
        self.should_error_on_retarget = should_error;
    }

    fn run_responder(&mut self) {
        let Some(responder) = self.responder else {
            return;
        };
        if self.write_buffer.len() <= self.responded_upto {
            return;
        }
        let response = responder(&self.write_buffer[self.responded_upto..]);
        self.responded_upto = self.write_buffer.len();
        let _ = self.read_buffer.extend_from_slice(&response);
    }
}

/// CRC-16/MODBUS over `data`, returned in wire order (low byte first).
pub fn crc16(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc.to_le_bytes()
}

/// RTU response frame carrying `words`, CRC appended.
pub fn rtu_read_response(unit: u8, function: u8, words: &[u16]) -> heapless::Vec<u8, 256> {
    let mut frame = heapless::Vec::new();
    let _ = frame.extend_from_slice(&[unit, function, (words.len() * 2) as u8]);
    for word in words {
        let _ = frame.extend_from_slice(&word.to_be_bytes());
    }
    let crc = crc16(&frame);
    let _ = frame.extend_from_slice(&crc);
    frame
}

/// RTU exception frame for a request sent with `function`.
pub fn rtu_exception(unit: u8, function: u8, code: u8) -> heapless::Vec<u8, 256> {
    let mut frame = heapless::Vec::new();
    let _ = frame.extend_from_slice(&[unit, function | 0x80, code]);
    let crc = crc16(&frame);
    let _ = frame.extend_from_slice(&crc);
    frame
}

/// TCP response frame carrying `words`, with the transaction id, unit id
/// and function code echoed from the captured `request`.
pub fn tcp_read_response(request: &[u8], words: &[u16]) -> heapless::Vec<u8, 256> {
    let mut frame = heapless::Vec::new();
    let length = (3 + words.len() * 2) as u16;
    let _ = frame.extend_from_slice(&request[0..2]);
    let _ = frame.extend_from_slice(&[0x00, 0x00]);
    let _ = frame.extend_from_slice(&length.to_be_bytes());
    let _ = frame.extend_from_slice(&[request[6], request[7], (words.len() * 2) as u8]);
    for word in words {
        let _ = frame.extend_from_slice(&word.to_be_bytes());
    }
    frame
}

type ScriptedResponse = (ReadStatus, heapless::Vec<u16, LONG_READ_REGS>);

/// Scripted [`Device`] with no wire behind it. Each call to
/// `read_registers` consumes the next scripted response; an exhausted
/// script answers with a timeout.
pub struct MockDevice {
    pub name: &'static str,
    pub scales: DeviceScales,
    pub cache: LongReadCache,
    responses: heapless::Vec<ScriptedResponse, 8>,
    cursor: usize,
    /// Every request made of this device: space, address, count
    pub calls: heapless::Vec<(RegisterSpace, u16, u16), 16>,
}

impl MockDevice {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            scales: DeviceScales::default(),
            cache: LongReadCache::new(),
            responses: heapless::Vec::new(),
            cursor: 0,
            calls: heapless::Vec::new(),
        }
    }

    pub fn push_response(&mut self, status: ReadStatus, words: &[u16]) {
        let mut stored = heapless::Vec::new();
        let _ = stored.extend_from_slice(words);
        let _ = self.responses.push((status, stored));
    }
}

impl Device for MockDevice {
    fn read_registers(
        &mut self,
        space: RegisterSpace,
        address: u16,
        count: u16,
        dst: &mut [u16],
    ) -> ReadStatus {
        let _ = self.calls.push((space, address, count));
        let Some((status, words)) = self.responses.get(self.cursor) else {
            return ReadStatus::Timeout;
        };
        self.cursor += 1;
        if status.is_ok() {
            let wanted = core::cmp::min(count as usize, dst.len());
            for (i, slot) in dst[..wanted].iter_mut().enumerate() {
                *slot = words.get(i).copied().unwrap_or(0);
            }
        }
        *status
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

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn test_new_mock_link() {
        let mock = MockLink::new();
        assert_eq!(mock.written_data().len(), 0);
        assert_eq!(mock.retargets().len(), 0);
        assert_eq!(mock.read_position, 0);
    }

    #[test]
    fn test_write_captures_data() {
        let mut mock = MockLink::new();
        mock.write(&[0x01, 0x03]).unwrap();
        mock.write(&[0x00, 0x18]).unwrap();
        assert_eq!(mock.written_data(), &[0x01, 0x03, 0x00, 0x18]);
    }

    #[test]
    fn test_read_without_data_would_block() {
        let mut mock = MockLink::new();
        let mut buffer = [0u8; 8];
        let result = mock.read(&mut buffer);
        assert!(matches!(result.unwrap_err(), MockLinkError::WouldBlock));
    }

    #[test]
    fn test_read_after_data_exhausted_would_block() {
        let mut mock = MockLink::new();
        mock.set_read_data(b"Hi").unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert!(matches!(
            mock.read(&mut buffer).unwrap_err(),
            MockLinkError::WouldBlock
        ));
    }

    #[test]
    fn test_responder_answers_newest_request_once() {
        let mut mock = MockLink::new();
        mock.set_responder(|request| {
            let mut reply = heapless::Vec::new();
            let _ = reply.push(request[0] + 1);
            reply
        });

        mock.write(&[0x10]).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], 0x11);

        // Nothing new written, so nothing more to answer.
        assert!(mock.read(&mut buffer).is_err());

        mock.write(&[0x20]).unwrap();
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], 0x21);
    }

    #[test]
    fn test_retargets_are_recorded() {
        use core::net::Ipv4Addr;

        let mut mock = MockLink::new();
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 502);
        mock.retarget(addr).unwrap();
        assert_eq!(mock.retargets(), &[addr]);

        mock.set_retarget_error(true);
        assert!(matches!(
            mock.retarget(addr).unwrap_err(),
            MockLinkError::Unreachable
        ));
    }

    #[test]
    fn test_link_errors_describe_themselves() {
        let err: &dyn core::error::Error = &MockLinkError::Unreachable;
        assert_eq!(err.to_string(), "peer unreachable");
        assert!(matches!(
            embedded_io::Error::kind(&MockLinkError::BufferOverflow),
            embedded_io::ErrorKind::OutOfMemory
        ));
    }

    #[test]
    fn test_crc16_known_frame() {
        // Valid frame captured from a holding-register read of one word.
        assert_eq!(crc16(&[0x01, 0x03, 0x02, 0x56, 0x78]), [0x87, 0xC6]);
    }

    #[test]
    fn test_rtu_read_response_layout() {
        let frame = rtu_read_response(0x01, 0x03, &[0x5678]);
        assert_eq!(&frame[..], &[0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6]);
    }

    #[test]
    fn test_scripted_device_consumes_responses_in_order() {
        let mut dev = MockDevice::new("scripted");
        dev.push_response(ReadStatus::Success, &[0x00AA]);
        dev.push_response(ReadStatus::IllegalDataAddress, &[]);

        let mut dst = [0u16; 1];
        assert_eq!(
            dev.read_registers(RegisterSpace::Holding, 0x0008, 1, &mut dst),
            ReadStatus::Success
        );
        assert_eq!(dst[0], 0x00AA);
        assert_eq!(
            dev.read_registers(RegisterSpace::Holding, 0x0008, 1, &mut dst),
            ReadStatus::IllegalDataAddress
        );
        // Script exhausted.
        assert_eq!(
            dev.read_registers(RegisterSpace::Holding, 0x0008, 1, &mut dst),
            ReadStatus::Timeout
        );
        assert_eq!(dev.calls.len(), 3);
    }
}
