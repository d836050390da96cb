use crate::driver::DriverError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the TDS packet header
pub const HEADER_LEN: usize = 8;

/// Packet size negotiated in LOGIN7 and used for every message we send
pub const PACKET_SIZE: usize = 4096;

/// Upper bound for a reassembled server message
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Last packet of a message
pub const STATUS_EOM: u8 = 0x01;

/// TDS packet types used by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    SqlBatch = 0x01,
    TabularResult = 0x04,
    Login7 = 0x10,
    PreLogin = 0x12,
}

impl TryFrom<u8> for PacketType {
    type Error = DriverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x04 => Ok(Self::TabularResult),
            0x10 => Ok(Self::Login7),
            0x12 => Ok(Self::PreLogin),
            other => Err(DriverError::Protocol(format!(
                "unknown packet type 0x{other:02x}"
            ))),
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub ty: u8,
    pub status: u8,
    /// Total packet length including the header
    pub length: usize,
}

impl Header {
    /// Encode a header for a packet carrying `payload_len` bytes
    #[must_use]
    pub fn encode(ty: u8, status: u8, payload_len: usize, packet_id: u8) -> [u8; HEADER_LEN] {
        let length = u16::try_from(payload_len + HEADER_LEN).unwrap_or(u16::MAX);
        let [hi, lo] = length.to_be_bytes();
        [ty, status, hi, lo, 0, 0, packet_id, 0]
    }

    /// Decode and sanity-check a raw header
    ///
    /// # Errors
    ///
    /// Returns an error if the length field is smaller than the header itself
    pub fn decode(raw: [u8; HEADER_LEN]) -> Result<Self, DriverError> {
        let [ty, status, hi, lo, ..] = raw;
        let length = usize::from(u16::from_be_bytes([hi, lo]));
        if length < HEADER_LEN {
            return Err(DriverError::Protocol(format!(
                "invalid packet length {length}"
            )));
        }
        Ok(Self { ty, status, length })
    }

    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.length - HEADER_LEN
    }

    #[must_use]
    pub const fn is_eom(&self) -> bool {
        self.status & STATUS_EOM != 0
    }
}

/// Write `payload` as one message, split into packets of at most `PACKET_SIZE`.
///
/// # Errors
///
/// Returns an error if writing to the stream fails
pub async fn write_message<S>(stream: &mut S, ty: PacketType, payload: &[u8]) -> Result<(), DriverError>
where
    S: AsyncWrite + Unpin,
{
    let mut chunks = payload.chunks(PACKET_SIZE - HEADER_LEN).peekable();
    let mut packet_id: u8 = 1;
    let mut packet = Vec::with_capacity(PACKET_SIZE);

    // an empty payload still produces one (EOM) packet
    if chunks.peek().is_none() {
        packet.extend_from_slice(&Header::encode(ty as u8, STATUS_EOM, 0, packet_id));
        stream.write_all(&packet).await?;
        stream.flush().await?;
        return Ok(());
    }

    while let Some(chunk) = chunks.next() {
        let status = if chunks.peek().is_none() { STATUS_EOM } else { 0 };
        packet.clear();
        packet.extend_from_slice(&Header::encode(ty as u8, status, chunk.len(), packet_id));
        packet.extend_from_slice(chunk);
        stream.write_all(&packet).await?;
        packet_id = packet_id.wrapping_add(1);
    }
    stream.flush().await?;

    Ok(())
}

/// Read packets until end-of-message and return the packet type with the
/// reassembled payload.
///
/// # Errors
///
/// Returns an error if the stream closes, a header is invalid, packet types
/// change mid-message, or the message exceeds `MAX_MESSAGE_LEN`
pub async fn read_message<S>(stream: &mut S) -> Result<(PacketType, Vec<u8>), DriverError>
where
    S: AsyncRead + Unpin,
{
    let mut payload = Vec::new();
    let mut message_type: Option<u8> = None;

    loop {
        let mut raw = [0u8; HEADER_LEN];
        stream.read_exact(&mut raw).await?;
        let header = Header::decode(raw)?;

        match message_type {
            None => message_type = Some(header.ty),
            Some(ty) if ty != header.ty => {
                return Err(DriverError::Protocol(format!(
                    "packet type changed mid-message (0x{ty:02x} -> 0x{:02x})",
                    header.ty
                )));
            }
            Some(_) => {}
        }

        if payload.len() + header.payload_len() > MAX_MESSAGE_LEN {
            return Err(DriverError::Protocol(format!(
                "server message exceeds {MAX_MESSAGE_LEN} bytes"
            )));
        }

        let start = payload.len();
        payload.resize(start + header.payload_len(), 0);
        if let Some(buf) = payload.get_mut(start..) {
            stream.read_exact(buf).await?;
        }

        if header.is_eom() {
            break;
        }
    }

    let ty = PacketType::try_from(message_type.unwrap_or_default())?;
    Ok((ty, payload))
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )]

    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let raw = Header::encode(PacketType::PreLogin as u8, STATUS_EOM, 26, 1);
        assert_eq!(raw, [0x12, 0x01, 0x00, 0x22, 0x00, 0x00, 0x01, 0x00]);

        let header = Header::decode(raw).unwrap();
        assert_eq!(header.ty, 0x12);
        assert_eq!(header.length, 34);
        assert_eq!(header.payload_len(), 26);
        assert!(header.is_eom());
    }

    #[test]
    fn test_header_decode_too_short() {
        let result = Header::decode([0x04, 0x01, 0x00, 0x04, 0, 0, 0, 0]);
        assert!(matches!(result, Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_packet_type_unknown() {
        assert!(PacketType::try_from(0x99).is_err());
        assert_eq!(PacketType::try_from(0x04).unwrap(), PacketType::TabularResult);
    }

    #[tokio::test]
    async fn test_write_message_splits_packets() {
        let payload = vec![0xAB; PACKET_SIZE * 2];
        let mut wire = Vec::new();
        write_message(&mut wire, PacketType::Login7, &payload)
            .await
            .unwrap();

        // 8192 bytes of payload need three packets of at most 4088 bytes
        assert_eq!(wire.len(), payload.len() + 3 * HEADER_LEN);
        assert_eq!(wire[0], 0x10);
        assert_eq!(wire[1], 0);
        assert_eq!(wire[6], 1);

        let mut reader = wire.as_slice();
        let (ty, decoded) = read_message(&mut reader).await.unwrap();
        assert_eq!(ty, PacketType::Login7);
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_write_empty_message() {
        let mut wire = Vec::new();
        write_message(&mut wire, PacketType::SqlBatch, &[])
            .await
            .unwrap();
        assert_eq!(wire, Header::encode(0x01, STATUS_EOM, 0, 1).to_vec());
    }

    #[tokio::test]
    async fn test_read_message_truncated() {
        let mut wire = Header::encode(0x04, STATUS_EOM, 10, 1).to_vec();
        wire.extend_from_slice(&[0u8; 4]);
        let mut reader = wire.as_slice();
        let result = read_message(&mut reader).await;
        assert!(matches!(result, Err(DriverError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_message_type_change() {
        let mut wire = Header::encode(0x04, 0, 1, 1).to_vec();
        wire.push(0xFD);
        wire.extend_from_slice(&Header::encode(0x12, STATUS_EOM, 1, 2));
        wire.push(0xFD);
        let mut reader = wire.as_slice();
        let result = read_message(&mut reader).await;
        assert!(matches!(result, Err(DriverError::Protocol(_))));
    }
}
