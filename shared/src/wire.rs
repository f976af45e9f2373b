//! Wire protocol: discrete object-graph messages over one ordered stream.
//!
//! Each logical send is one bincode-encoded [`Message`] behind a 4-byte
//! big-endian length prefix. The receiver dispatches on the enum variant,
//! which stands in for the runtime type tag of the transferred object graph.

use crate::error::SyncError;
use crate::event::{Event, EventType};
use crate::object::GameObject;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are treated as protocol corruption.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Durable record of remote interest in one event type.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRegistration {
    pub event_type: EventType,
}

/// Everything that crosses the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    Object(GameObject),
    Event(Event),
    Registration(RemoteRegistration),
}

/// Serializes and transmits one message, then flushes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(message)?;
    if data.len() > MAX_MESSAGE_BYTES {
        return Err(SyncError::OversizedMessage(data.len()));
    }

    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking-reads one message from the transport.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, SyncError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(SyncError::OversizedMessage(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(bincode::deserialize(&data)?)
}
