//! Data connections.
//!
//! A socket whose first frame is `ConnectionReady` stops being framed:
//! everything after the handshake is raw session payload. The bytes the
//! frame reader had already buffered past the handshake are kept as a
//! prefix and returned by the first reads, before the socket itself.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::coordinator::Command;
use crate::types::CommandTx;

/// Raw data socket for one session, handed to `join_session` /
/// `wait_for_data_connection` callers.
///
/// Reading EOF (the engine closed its end) or dropping it removes it
/// from the server's data-connection set.
#[derive(Debug)]
pub struct DataConnection {
    session_id: String,
    link_id: u64,
    peer_addr: SocketAddr,
    prefix: Bytes,
    stream: TcpStream,
    commands: Option<CommandTx>,
}

/// Server-side handle on a live data connection, used to force it
/// closed on `stop()`.
#[derive(Debug)]
pub(crate) struct DataLink {
    pub link_id: u64,
    shadow: std::net::TcpStream,
}

impl DataLink {
    pub fn shutdown(&self) {
        let _ = self.shadow.shutdown(Shutdown::Both);
    }

    /// True once the peer has closed its end (or the socket failed).
    /// Never blocks: the socket is in non-blocking mode.
    pub fn peer_closed(&self) -> bool {
        let mut byte = [0u8; 1];
        match self.shadow.peek(&mut byte) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => e.kind() != io::ErrorKind::WouldBlock,
        }
    }
}

impl DataConnection {
    pub(crate) fn new(
        session_id: String,
        link_id: u64,
        stream: TcpStream,
        prefix: Bytes,
        commands: CommandTx,
    ) -> io::Result<(Self, DataLink)> {
        let peer_addr = stream.peer_addr()?;

        // Keep a second handle on the socket so the server can shut it
        // down while the caller owns the tokio stream.
        let std_stream = stream.into_std()?;
        let shadow = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;

        let conn = DataConnection {
            session_id,
            link_id,
            peer_addr,
            prefix,
            stream,
            commands: Some(commands),
        };
        Ok((conn, DataLink { link_id, shadow }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Bytes received together with the handshake that have not been
    /// read yet.
    pub fn residual(&self) -> &[u8] {
        &self.prefix
    }

    pub(crate) fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Tell the server this socket is gone. Only the first call sends.
    fn notify_closed(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::DataClosed {
                session_id: self.session_id.clone(),
                link_id: self.link_id,
            });
        }
    }
}

impl AsyncRead for DataConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }

        let had_room = buf.remaining() > 0;
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.stream).poll_read(cx, buf);
        match &poll {
            // EOF: the peer closed its end.
            Poll::Ready(Ok(())) if had_room && buf.filled().len() == before => {
                this.notify_closed()
            }
            Poll::Ready(Err(_)) => this.notify_closed(),
            _ => {}
        }
        poll
    }
}

impl AsyncWrite for DataConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl Drop for DataConnection {
    fn drop(&mut self) {
        self.notify_closed();
    }
}
