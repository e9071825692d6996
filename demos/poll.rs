use std::cell::RefCell;
use std::env;
use std::net::{SocketAddr, SocketAddrV4, TcpStream};

use inquire::Select;
use serialport::SerialPort;

use microgrid_modbus::channel::Channel;
use microgrid_modbus::device::{Device, DeviceId, DeviceScales};
use microgrid_modbus::table::{ChannelBank, ChannelSet};
use microgrid_modbus::transport::{Retarget, RtuDevice, TcpDevice};
use microgrid_modbus::value::{DataKind, RegisterSpace, per_unit_scale};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
// The controllers take a moment to turn a request around on the shared line.
const SERIAL_TIMEOUT_MS: u64 = 300;
const TCP_TIMEOUT_MS: u64 = 500;
const BMS_ADDR: &str = "192.168.1.21:502";
const MPPT_UNIT_ID: u8 = 0x01;
const DIVERSION_UNIT_ID: u8 = 0x02;
const BMS_UNIT_ID: u8 = 0x01;
const CYCLE_DELAY_MS: u64 = 2000;
const CYCLES: usize = 10;
// Slow channels change rarely; poll them every Nth cycle.
const SLOW_EVERY: usize = 6;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionRefused => embedded_io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::AddrInUse => embedded_io::ErrorKind::AddrInUse,
            std::io::ErrorKind::AddrNotAvailable => embedded_io::ErrorKind::AddrNotAvailable,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::AlreadyExists => embedded_io::ErrorKind::AlreadyExists,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// TCP stream that dials on demand and redials whenever the peer address
/// changes or the previous socket died.
struct LazyTcp {
    stream: Option<TcpStream>,
    peer: Option<SocketAddrV4>,
}

impl LazyTcp {
    fn new() -> Self {
        LazyTcp {
            stream: None,
            peer: None,
        }
    }
}

impl embedded_io::ErrorType for LazyTcp {
    type Error = IoError;
}

impl embedded_io::Read for LazyTcp {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(IoError(std::io::ErrorKind::NotConnected.into()));
        };
        match std::io::Read::read(stream, buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                // Drop the socket so the next poll redials.
                self.stream = None;
                Err(IoError(e))
            }
        }
    }
}

impl embedded_io::Write for LazyTcp {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(IoError(std::io::ErrorKind::NotConnected.into()));
        };
        match std::io::Write::write(stream, buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.stream = None;
                Err(IoError(e))
            }
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match self.stream.as_mut() {
            Some(stream) => std::io::Write::flush(stream).map_err(IoError),
            None => Ok(()),
        }
    }
}

impl Retarget for LazyTcp {
    type RetargetError = std::io::Error;

    fn retarget(&mut self, addr: SocketAddrV4) -> Result<(), Self::RetargetError> {
        if self.peer == Some(addr) && self.stream.is_some() {
            return Ok(());
        }
        let timeout = std::time::Duration::from_millis(TCP_TIMEOUT_MS);
        let stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        println!("Connected to BMS at {addr}");
        self.stream = Some(stream);
        self.peer = Some(addr);
        Ok(())
    }
}

fn channel(
    device: DeviceId,
    space: RegisterSpace,
    address: u16,
    kind: DataKind,
    name: &'static str,
    label: &'static str,
    units: &'static str,
) -> Channel {
    Channel::new(device, space, address, kind, name, label, units).expect("channel definition")
}

/// Read the controller's per-unit scale registers and install the real
/// voltage and current factors. Without them the scaled kinds fall back to
/// unit factors and read nonsense.
fn install_scales(dev: &mut RtuDevice<'_, PortWrapper>) {
    let mut words = [0u16; 4];
    let status = dev.read_registers(RegisterSpace::Holding, 0x0000, 4, &mut words);
    if status.is_ok() {
        let voltage = per_unit_scale(((words[0] as u32) << 16) | words[1] as u32);
        let current = per_unit_scale(((words[2] as u32) << 16) | words[3] as u32);
        println!(
            "unit {}: V_PU {:.4}  I_PU {:.4}",
            dev.unit_id(),
            voltage,
            current
        );
        dev.set_scales(DeviceScales::new(current, voltage));
    } else {
        eprintln!(
            "unit {}: scale registers unreadable ({status}), keeping unit factors",
            dev.unit_id()
        );
    }
}

fn build_bank(mppt: DeviceId, div: DeviceId, bms: DeviceId) -> ChannelBank {
    let mut fast = ChannelSet::new("fast");
    let mut block = channel(
        mppt,
        RegisterSpace::None,
        0x0018,
        DataKind::LongRead,
        "fast_block",
        "Controller block fetch",
        "",
    );
    // The MPPT controllers keep 45 contiguous live registers at 0x0018.
    block.set_long_read_span(45);
    fast.push(block).unwrap();
    let fast_channels = [
        (0x0018, DataKind::ScaledVoltage, "vb", "Battery voltage", "V"),
        (0x001B, DataKind::ScaledVoltage, "va", "Array voltage", "V"),
        (0x001C, DataKind::ScaledCurrent, "ib", "Battery current", "A"),
        (0x001D, DataKind::ScaledCurrent, "ia", "Array current", "A"),
        (0x0023, DataKind::Float16, "t_hs", "Heatsink temperature", "C"),
        (0x003A, DataKind::ScaledPower, "p_out", "Output power", "W"),
    ];
    for (address, kind, name, label, units) in fast_channels {
        fast.push(channel(
            mppt,
            RegisterSpace::Holding,
            address,
            kind,
            name,
            label,
            units,
        ))
        .unwrap();
    }

    let mut slow = ChannelSet::new("slow");
    slow.push(channel(
        mppt,
        RegisterSpace::Holding,
        0x0004,
        DataKind::HalfWord,
        "ver_sw",
        "Firmware version",
        "",
    ))
    .unwrap();
    slow.push(channel(
        mppt,
        RegisterSpace::Holding,
        0xE0C0,
        DataKind::Text { len: 8 },
        "serial",
        "Serial number",
        "",
    ))
    .unwrap();
    slow.push(channel(
        div,
        RegisterSpace::Holding,
        0x0004,
        DataKind::HalfWord,
        "div_ver",
        "Diversion firmware version",
        "",
    ))
    .unwrap();
    slow.push(channel(
        div,
        RegisterSpace::Holding,
        0x0008,
        DataKind::ScaledVoltage,
        "div_vb",
        "Diversion battery voltage",
        "V",
    ))
    .unwrap();

    let mut bms_set = ChannelSet::new("bms");
    let mut pack_v = channel(
        bms,
        RegisterSpace::Holding,
        0x0000,
        DataKind::Scaled,
        "pack_v",
        "Pack voltage",
        "V",
    );
    pack_v.set_scale(0.1);
    bms_set.push(pack_v).unwrap();
    let mut pack_i = channel(
        bms,
        RegisterSpace::Holding,
        0x0001,
        DataKind::HalfWordSignedScaled,
        "pack_i",
        "Pack current",
        "A",
    );
    pack_i.set_scale(0.1);
    bms_set.push(pack_i).unwrap();
    bms_set
        .push(channel(
            bms,
            RegisterSpace::Holding,
            0x0002,
            DataKind::HalfWord,
            "soc",
            "State of charge",
            "%",
        ))
        .unwrap();
    bms_set
        .push(channel(
            bms,
            RegisterSpace::Holding,
            0x0003,
            DataKind::HalfWordSigned,
            "t_pack",
            "Pack temperature",
            "C",
        ))
        .unwrap();

    let mut bank = ChannelBank::new();
    bank.add_set(fast).unwrap();
    bank.add_set(slow).unwrap();
    bank.add_set(bms_set).unwrap();
    bank
}

fn device_for<'d>(
    id: DeviceId,
    controllers: &'d mut [RtuDevice<'_, PortWrapper>],
    bms: &'d mut TcpDevice<LazyTcp, SocketAddrV4>,
) -> &'d mut dyn Device {
    match controllers.get_mut(id.0 as usize) {
        Some(dev) => dev,
        None => bms,
    }
}

fn poll_set(
    set: &mut ChannelSet,
    controllers: &mut [RtuDevice<'_, PortWrapper>],
    bms: &mut TcpDevice<LazyTcp, SocketAddrV4>,
) {
    for channel in set.iter_mut() {
        let device = device_for(channel.device(), controllers, bms);
        // Channels inside a freshly fetched block decode from the cache
        // instead of going back out on the wire.
        let use_cache = channel.covered_by(device.cache());
        channel.read(device, use_cache);
    }
}

fn main() {
    env_logger::init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select the RS-485 port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let bms_addr: SocketAddrV4 = env::args()
        .nth(2)
        .unwrap_or_else(|| BMS_ADDR.to_string())
        .parse()
        .expect("BMS address must be ip:port");

    println!("Using port: {port_name}, BMS at {bms_addr}");

    let port = serialport::new(&port_name, BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::Two)
        .parity(serialport::Parity::None)
        .timeout(std::time::Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    let line = RefCell::new(PortWrapper(port));
    let mut controllers: [RtuDevice<'_, PortWrapper>; 2] = [
        RtuDevice::new(&line, MPPT_UNIT_ID, "mppt600"),
        RtuDevice::new(&line, DIVERSION_UNIT_ID, "div60"),
    ];
    for dev in controllers.iter_mut() {
        install_scales(dev);
    }

    let mut bms: TcpDevice<LazyTcp, SocketAddrV4> =
        TcpDevice::new(LazyTcp::new(), bms_addr, BMS_UNIT_ID, "bms");

    let mut bank = build_bank(DeviceId(0), DeviceId(1), DeviceId(2));

    for cycle in 0..CYCLES {
        poll_set(bank.set_mut("fast").unwrap(), &mut controllers, &mut bms);
        if cycle % SLOW_EVERY == 0 {
            poll_set(bank.set_mut("slow").unwrap(), &mut controllers, &mut bms);
            poll_set(bank.set_mut("bms").unwrap(), &mut controllers, &mut bms);
        }

        println!("--- cycle {cycle} ---");
        for set in bank.sets() {
            for ch in set.iter() {
                if ch.kind() == DataKind::LongRead {
                    continue;
                }
                println!(
                    "{:<10} {:<28} {:>12} {}",
                    ch.name(),
                    ch.label(),
                    ch.value_text(),
                    ch.units()
                );
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(CYCLE_DELAY_MS));
    }
}
