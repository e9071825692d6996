//! Named groups of channels, looked up by set name and position the way
//! the telemetry exporter addresses them.

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Channels a set can hold.
pub const SET_CAPACITY: usize = 64;

/// Sets a bank can hold.
pub const BANK_CAPACITY: usize = 8;

/// An ordered, named group of channels. Positions are stable after
/// construction, so an exporter may address channels by index.
pub struct ChannelSet {
    name: &'static str,
    channels: heapless::Vec<Channel, SET_CAPACITY>,
}

impl ChannelSet {
    pub fn new(name: &'static str) -> Self {
        ChannelSet {
            name,
            channels: heapless::Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn push(&mut self, channel: Channel) -> Result<()> {
        self.channels.push(channel).map_err(|_| Error::SetFull)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    /// Human-readable label of the channel at `index`.
    pub fn label(&self, index: usize) -> Result<&str> {
        self.channels
            .get(index)
            .map(|c| c.label())
            .ok_or(Error::IndexOutOfRange)
    }

    /// Exported text of the channel at `index`; see
    /// [`Channel::value_text`].
    pub fn value_text(&self, index: usize) -> Result<&str> {
        self.channels
            .get(index)
            .map(|c| c.value_text())
            .ok_or(Error::IndexOutOfRange)
    }
}

/// All the sets of an installation. Set names are unique; lookup is by
/// name so exporters need no knowledge of construction order.
#[derive(Default)]
pub struct ChannelBank {
    sets: heapless::Vec<ChannelSet, BANK_CAPACITY>,
}

impl ChannelBank {
    pub fn new() -> Self {
        ChannelBank {
            sets: heapless::Vec::new(),
        }
    }

    pub fn add_set(&mut self, set: ChannelSet) -> Result<()> {
        if self.set(set.name()).is_some() {
            return Err(Error::DuplicateSet);
        }
        self.sets.push(set).map_err(|_| Error::BankFull)
    }

    pub fn set(&self, name: &str) -> Option<&ChannelSet> {
        self.sets.iter().find(|s| s.name() == name)
    }

    pub fn set_mut(&mut self, name: &str) -> Option<&mut ChannelSet> {
        self.sets.iter_mut().find(|s| s.name() == name)
    }

    pub fn sets(&self) -> impl Iterator<Item = &ChannelSet> {
        self.sets.iter()
    }

    pub fn sets_mut(&mut self) -> impl Iterator<Item = &mut ChannelSet> {
        self.sets.iter_mut()
    }

    pub fn label(&self, set: &str, index: usize) -> Result<&str> {
        self.set(set).ok_or(Error::UnknownSet)?.label(index)
    }

    pub fn value_text(&self, set: &str, index: usize) -> Result<&str> {
        self.set(set).ok_or(Error::UnknownSet)?.value_text(index)
    }
}
