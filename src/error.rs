//! Error types for channel table construction and lookup.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors from building or querying channel tables.
///
/// Failed register transactions are not represented here: a failed read is
/// recorded on its channel as a
/// [`ReadStatus`](crate::status::ReadStatus) and never aborts a poll cycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("channel set is full")]
    SetFull,
    #[error("channel bank is full")]
    BankFull,
    #[error("channel set name already taken")]
    DuplicateSet,
    #[error("unknown channel set")]
    UnknownSet,
    #[error("channel index out of range")]
    IndexOutOfRange,
    #[error("text length exceeds channel capacity")]
    TextTooLong,
}
