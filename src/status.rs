use strum_macros::EnumIter;

/// Outcome of one channel read, recorded on the channel after every poll.
///
/// Discriminants are the raw codes the field devices and their bus libraries
/// report: `0x01`-`0x04` are standard Modbus exception codes, `0xE0`-`0xE3`
/// are master-side transport failures, and the last two are produced by this
/// engine without touching the wire. Telemetry that logs raw codes stays
/// comparable with the deployed controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter)]
#[repr(u8)]
pub enum ReadStatus {
    /// Transaction completed and the payload decoded.
    Success = 0x00,
    /// Device rejected the function code.
    IllegalFunction = 0x01,
    /// Device rejected the register address.
    IllegalDataAddress = 0x02,
    /// Device rejected a value in the request.
    IllegalDataValue = 0x03,
    /// Device reported an internal failure.
    DeviceFailure = 0x04,
    /// Response carried a different unit id than the request.
    InvalidUnitId = 0xE0,
    /// Response carried a different function code than the request.
    InvalidFunction = 0xE1,
    /// No complete response before the transport gave up.
    Timeout = 0xE2,
    /// Response failed its frame check or was structurally broken.
    FrameCheck = 0xE3,
    /// Cache-relative read attempted while the device cache was invalid.
    CacheUnavailable = 99,
    /// No read attempted yet.
    #[default]
    Uninitialized = 255,
}

impl ReadStatus {
    pub fn is_ok(self) -> bool {
        self == ReadStatus::Success
    }

    /// The raw status code as the device libraries number it.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Short diagnostic text for logs and operator consoles.
    pub fn message(self) -> &'static str {
        match self {
            ReadStatus::Success => "success",
            ReadStatus::IllegalFunction => "illegal function",
            ReadStatus::IllegalDataAddress => "illegal data address",
            ReadStatus::IllegalDataValue => "illegal data value",
            ReadStatus::DeviceFailure => "device failure",
            ReadStatus::InvalidUnitId => "invalid unit id in response",
            ReadStatus::InvalidFunction => "invalid function in response",
            ReadStatus::Timeout => "response timed out",
            ReadStatus::FrameCheck => "frame check failed",
            ReadStatus::CacheUnavailable => "cache unavailable",
            ReadStatus::Uninitialized => "no read attempted",
        }
    }

    /// Map a Modbus exception code (the byte following a `0x80`-flagged
    /// function code) onto the taxonomy. Codes past the four standard ones
    /// collapse into [`ReadStatus::DeviceFailure`].
    pub fn from_exception_code(code: u8) -> Self {
        match code {
            0x01 => ReadStatus::IllegalFunction,
            0x02 => ReadStatus::IllegalDataAddress,
            0x03 => ReadStatus::IllegalDataValue,
            _ => ReadStatus::DeviceFailure,
        }
    }
}

impl core::fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}
