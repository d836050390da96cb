use super::packet::{HEADER_LEN, Header, PACKET_SIZE, PacketType, STATUS_EOM};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Transport adapter used while TLS is negotiated inside TDS.
///
/// SQL Server (TDS 7.x) expects the TLS handshake records to travel inside
/// PRELOGIN packets. While the handshake is pending, writes are buffered and
/// framed into PRELOGIN packets on flush, and reads strip the packet headers
/// of the peer's frames. Once the handshake completes the driver calls
/// [`PreloginWrapper::finish_handshake`] and the adapter becomes a
/// pass-through, TLS records then flow directly over the transport.
///
/// The switch is driven by the local side only. A peer using the adapter
/// must negotiate TLS 1.2: in TLS 1.3 the client sends application data right
/// after its Finished, while the server is still reading PRELOGIN frames.
#[derive(Debug)]
pub struct PreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,

    header: [u8; HEADER_LEN],
    header_pos: usize,
    read_remaining: usize,

    write_buf: Vec<u8>,
    frames: Vec<u8>,
    frames_pos: usize,
}

impl<S> PreloginWrapper<S> {
    pub const fn new(stream: S) -> Self {
        Self {
            stream,
            pending_handshake: true,
            header: [0; HEADER_LEN],
            header_pos: 0,
            read_remaining: 0,
            write_buf: Vec::new(),
            frames: Vec::new(),
            frames_pos: 0,
        }
    }

    /// Switch to pass-through mode
    pub const fn finish_handshake(&mut self) {
        self.pending_handshake = false;
    }

    #[must_use]
    pub const fn is_handshake_pending(&self) -> bool {
        self.pending_handshake
    }

    pub const fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Move buffered handshake bytes into PRELOGIN frames
    fn frame_pending_writes(&mut self) {
        let mut chunks = self.write_buf.chunks(PACKET_SIZE - HEADER_LEN).peekable();
        let mut packet_id: u8 = 1;
        while let Some(chunk) = chunks.next() {
            let status = if chunks.peek().is_none() { STATUS_EOM } else { 0 };
            self.frames.extend_from_slice(&Header::encode(
                PacketType::PreLogin as u8,
                status,
                chunk.len(),
                packet_id,
            ));
            self.frames.extend_from_slice(chunk);
            packet_id = packet_id.wrapping_add(1);
        }
        self.write_buf.clear();
    }
}

fn unexpected_eof(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("connection closed inside PRELOGIN {what}"),
    )
}

impl<S: AsyncRead + Unpin> AsyncRead for PreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        while this.read_remaining == 0 {
            while this.header_pos < HEADER_LEN {
                let mut header_buf =
                    ReadBuf::new(this.header.get_mut(this.header_pos..).unwrap_or_default());
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header_buf))?;
                let n = header_buf.filled().len();
                if n == 0 {
                    if this.header_pos == 0 {
                        // clean EOF between packets
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(unexpected_eof("header")));
                }
                this.header_pos += n;
            }

            let header = Header::decode(this.header).map_err(io::Error::other)?;
            if header.ty != PacketType::PreLogin as u8 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected PRELOGIN packet during TLS handshake, got 0x{:02x}",
                        header.ty
                    ),
                )));
            }
            this.header_pos = 0;
            this.read_remaining = header.payload_len();
        }

        let want = this.read_remaining.min(buf.remaining());
        let mut scratch = vec![0u8; want];
        let mut body = ReadBuf::new(&mut scratch);
        ready!(Pin::new(&mut this.stream).poll_read(cx, &mut body))?;
        let n = body.filled().len();
        if n == 0 && want > 0 {
            return Poll::Ready(Err(unexpected_eof("payload")));
        }
        buf.put_slice(body.filled());
        this.read_remaining -= n;

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        // bytes written while an earlier flush was pending are framed once
        // the previous frames are out
        loop {
            if this.frames_pos >= this.frames.len() {
                this.frames.clear();
                this.frames_pos = 0;
                if this.write_buf.is_empty() {
                    break;
                }
                this.frame_pending_writes();
            }

            let pending = this.frames.get(this.frames_pos..).unwrap_or_default();
            let n = ready!(Pin::new(&mut this.stream).poll_write(cx, pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.frames_pos += n;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
