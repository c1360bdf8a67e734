//! Reading and writing whole messages on a byte stream
//!
//! The protocol has no frame delimiter. A sender writes one message per
//! `write_all` + `flush` and a receiver takes whatever a single bounded read
//! returns as one payload, splitting coalesced task assignments with
//! [`Message::decode_payload`].

use crate::error::{ProtocolError, Result};
use crate::message::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default size of the per-read buffer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Read one payload into `buf`
///
/// Returns the bytes received by a single read. An empty slice means the
/// peer closed the stream, which the protocol treats as a disconnect.
pub async fn read_payload<'a, R>(reader: &mut R, buf: &'a mut [u8]) -> std::io::Result<&'a [u8]>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read(buf).await?;
    Ok(&buf[..n])
}

/// Write a message in a single write and flush it
pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = message.encode();
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await
}

/// Decode the messages held by one payload
pub fn decode_bytes(payload: &[u8]) -> Result<Vec<Message>> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::Utf8)?;
    Message::decode_payload(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[tokio::test]
    async fn test_write_then_read_single_payload() {
        let (mut client, mut server) = tokio::io::duplex(256);

        write_message(&mut client, &Message::Hello).await.unwrap();

        let mut buf = [0u8; DEFAULT_READ_BUFFER_SIZE];
        let payload = read_payload(&mut server, &mut buf).await.unwrap();
        assert_eq!(decode_bytes(payload).unwrap(), vec![Message::Hello]);
    }

    #[tokio::test]
    async fn test_closed_stream_reads_as_disconnect() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let mut buf = [0u8; 64];
        let payload = read_payload(&mut server, &mut buf).await.unwrap();
        assert!(payload.is_empty());
        assert_eq!(decode_bytes(payload).unwrap(), vec![Message::Disconnect]);
    }

    #[tokio::test]
    async fn test_coalesced_assignments_are_split() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let first = Task::new("a", 3, ["1"]).unwrap();
        let second = Task::new("b", 4, ["2"]).unwrap();

        write_message(&mut client, &Message::Assign(first.clone()))
            .await
            .unwrap();
        write_message(&mut client, &Message::Assign(second.clone()))
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let mut received = Vec::new();
        while received.len() < 2 {
            let payload = read_payload(&mut server, &mut buf).await.unwrap();
            received.extend(decode_bytes(payload).unwrap());
        }
        assert_eq!(received, vec![Message::Assign(first), Message::Assign(second)]);
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(decode_bytes(&[0xff, 0xfe]), Err(ProtocolError::Utf8));
    }
}
