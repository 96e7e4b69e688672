//! Transport seam between the connection and the byte stream.
//!
//! The connection only sees JSON values: a [`Transport`] sends them, a
//! [`TransportReceiver`] reads them into an unbounded channel. [`PipeTransport`]
//! implements both over any `AsyncWrite`/`AsyncRead` pair using the driver
//! framing:
//!
//! ```text
//! [length: u32 little-endian][JSON bytes]
//! ```

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Send half of a transport.
pub trait Transport: Send {
	/// Writes one message.
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a transport, consumed by its read loop.
pub trait TransportReceiver: Send {
	/// Reads messages until the stream ends.
	///
	/// Returns `Ok(())` on a clean end of stream or when nobody is listening
	/// any more.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Everything a connection needs from a transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

impl std::fmt::Debug for TransportParts {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransportParts").finish_non_exhaustive()
	}
}

/// Length-prefixed JSON over a pair of pipes.
pub struct PipeTransport<W, R> {
	stdin: W,
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `stdin` and reading from `stdout`.
	///
	/// Returns the transport and the receiver decoded messages arrive on.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				stdin,
				stdout,
				message_tx,
			},
			message_rx,
		)
	}

	/// Writes one framed message.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.stdin, &message).await
	}

	/// Reads frames until end of stream.
	pub async fn run(&mut self) -> Result<()> {
		read_loop(&mut self.stdout, &self.message_tx).await
	}

	/// Splits into independently owned halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender { stdin: self.stdin },
			PipeTransportReceiver {
				stdout: self.stdout,
				message_tx: self.message_tx,
			},
		)
	}

	/// Boxes both halves for [`Connection::new`](crate::Connection::new).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	stdin: W,
}

impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { write_frame(&mut self.stdin, &message).await })
	}
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for PipeTransportReceiver<R> {
	fn run(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		Box::pin(async move { read_loop(&mut self.stdout, &self.message_tx).await })
	}
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> Result<()> {
	let bytes = serde_json::to_vec(message)?;
	if bytes.len() > MAX_FRAME_LEN {
		return Err(Error::TransportError(format!(
			"Outgoing message of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
			bytes.len()
		)));
	}
	let length = bytes.len() as u32;
	writer
		.write_all(&length.to_le_bytes())
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write length prefix: {e}")))?;
	writer
		.write_all(&bytes)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write message: {e}")))?;
	writer
		.flush()
		.await
		.map_err(|e| Error::TransportError(format!("Failed to flush: {e}")))?;
	Ok(())
}

async fn read_loop<R: AsyncRead + Unpin>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()> {
	while let Some(frame) = read_frame(reader).await? {
		let message = match serde_json::from_slice::<Value>(&frame) {
			Ok(message) => message,
			Err(e) => {
				tracing::error!(error = %e, len = frame.len(), "Discarding malformed frame");
				continue;
			}
		};
		if message_tx.send(message).is_err() {
			tracing::debug!("Message receiver dropped, stopping read loop");
			return Ok(());
		}
	}
	tracing::debug!("Transport reached end of stream");
	Ok(())
}

/// Reads one frame, `None` on end of stream at a frame boundary.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
	let mut len_buf = [0u8; 4];
	let mut filled = 0;
	while filled < len_buf.len() {
		let n = reader
			.read(&mut len_buf[filled..])
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
		if n == 0 {
			if filled == 0 {
				return Ok(None);
			}
			return Err(Error::TransportError(format!(
				"Failed to read length prefix: stream ended after {filled} of 4 bytes"
			)));
		}
		filled += n;
	}

	let length = u32::from_le_bytes(len_buf) as usize;
	if length > MAX_FRAME_LEN {
		return Err(Error::TransportError(format!(
			"Incoming frame of {length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
		)));
	}

	let mut frame = vec![0u8; length];
	reader
		.read_exact(&mut frame)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;
	Ok(Some(frame))
}

#[cfg(test)]
mod tests;
