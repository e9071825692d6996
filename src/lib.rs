//! This crate polls the Modbus-attached devices of a small power
//! installation and decodes their registers into typed engineering values
//! ready for telemetry export.
//!
//! It supports `no-std` environments by use of the `no-std` feature flag.
//!
//! Two attachments are covered:
//! * Charge and diversion controllers on a shared RS-485 line, spoken to
//!   with Modbus RTU and told apart by unit id
//! * A battery management unit on the local network, spoken to with
//!   Modbus TCP at an address an operator may repoint at runtime
//!
//! Controller models this is written against:
//! * TS-MPPT-30
//! * TS-MPPT-45
//! * TS-MPPT-60
//! * TS-45 and TS-60 in diversion mode
//!
//! Controllers of the same family with the same register layout should
//! work as well.
//!
//! Measurements are declared as [`channel::Channel`]s and grouped into
//! [`table::ChannelSet`]s. Each poll either issues its own register read
//! or, for channels falling inside a device's bulk window, decodes out of
//! the cache left behind by that device's block-fetch channel, keeping
//! traffic on the shared line down.
//!
//! @TODO support RTU-framed gateways that bridge the RS-485 line onto TCP.
//!
//! The serial port used for controller comms should be configured like so:
//! * Baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 2
//! * Parity: None

#![cfg_attr(feature = "no-std", no_std)]

pub mod channel;
pub mod device;
pub mod error;
pub mod status;
pub mod table;
pub mod transport;
pub mod value;

#[cfg(test)]
mod mock_link;
