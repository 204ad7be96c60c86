//! IPC protocol between the supervisor and a hosted module process.
//!
//! Uses length-prefixed rkyv messages over the module's stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.

use std::io::{self, Read, Write};

use rkyv::api::high::{HighDeserializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;

/// Bumped whenever a message changes shape.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted message body.
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Entry point names a module declares in [`ModuleMessage::Hello`].
pub const ENTRY_NOTIFIER: &str = "notifier";
pub const ENTRY_RUN: &str = "run";
pub const ENTRY_COMMAND: &str = "command";
pub const ENTRY_STOP: &str = "stop";

/// Every entry point a loadable module must declare.
pub const REQUIRED_ENTRIES: [&str; 4] = [ENTRY_NOTIFIER, ENTRY_RUN, ENTRY_COMMAND, ENTRY_STOP];

/// Message sent from the supervisor to the module.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum HostMessage {
    /// Call the module's `run` with the given arguments.
    Run { args: Vec<String> },

    /// Deliver an operator command line.
    Command { line: String },

    /// Ask the running workload to return from `run`.
    Stop,

    /// Exit the module process.
    Shutdown,
}

/// Message sent from the module to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ModuleMessage {
    /// First message after start.
    Hello {
        protocol: u32,
        /// Version embedded in the module executable.
        version: String,
        /// Entry points the module provides.
        entries: Vec<String>,
    },

    /// The workload raised the update notifier.
    UpdateRequested,

    /// `run` returned.
    Exited { code: i32 },

    /// `run` panicked.
    Faulted { message: String },
}

/// Framing and codec failures.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The peer closed the stream between messages.
    #[error("channel closed")]
    Closed,

    #[error("I/O error on channel: {0}")]
    Io(#[from] io::Error),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Write a message using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<(), IpcError> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| IpcError::Encode(e.to_string()))?;
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(IpcError::TooLarge(bytes.len()));
    }

    let len = bytes.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a message using length-prefixed rkyv encoding.
///
/// End of stream before a length prefix is [`IpcError::Closed`]. Bodies are
/// validated before deserialization, since the peer may not be a module at all.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T, IpcError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, HighDeserializer<rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(IpcError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(IpcError::TooLarge(len));
    }

    let mut bytes = AlignedVec::<16>::with_capacity(len);
    bytes.resize(len, 0);
    reader.read_exact(&mut bytes)?;

    rkyv::from_bytes::<T, rkyv::rancor::Error>(&bytes).map_err(|e| IpcError::Decode(e.to_string()))
}
