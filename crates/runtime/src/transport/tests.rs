use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

async fn write_raw<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) {
	let json_bytes = serde_json::to_vec(message).unwrap();
	let length = json_bytes.len() as u32;
	writer.write_all(&length.to_le_bytes()).await.unwrap();
	writer.write_all(&json_bytes).await.unwrap();
	writer.flush().await.unwrap();
}

#[test]
fn test_length_prefix_encoding() {
	let length: u32 = 1234;
	let bytes = length.to_le_bytes();

	assert_eq!(bytes[0], (length & 0xFF) as u8);
	assert_eq!(bytes[1], ((length >> 8) & 0xFF) as u8);
	assert_eq!(bytes[2], ((length >> 16) & 0xFF) as u8);
	assert_eq!(bytes[3], ((length >> 24) & 0xFF) as u8);
	assert_eq!(u32::from_le_bytes(bytes), length);
}

#[tokio::test]
async fn test_send_message() {
	// Transport writes into the stdin pipe and reads from the stdout pipe.
	let (mut stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	let (mut sender, _receiver) = transport.into_parts();

	let test_message = serde_json::json!({
		"id": 1,
		"guid": "page@1",
		"method": "goto",
		"params": {"url": "about:blank"}
	});
	Transport::send(&mut sender, test_message.clone()).await.unwrap();

	let mut len_buf = [0u8; 4];
	stdin_read.read_exact(&mut len_buf).await.unwrap();
	let length = u32::from_le_bytes(len_buf) as usize;
	let mut msg_buf = vec![0u8; length];
	stdin_read.read_exact(&mut msg_buf).await.unwrap();

	let received: Value = serde_json::from_slice(&msg_buf).unwrap();
	assert_eq!(received, test_message);
}

#[tokio::test]
async fn test_multiple_messages_in_sequence() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(4096);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(4096);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let messages = vec![
		serde_json::json!({"id": 1, "result": {}}),
		serde_json::json!({"guid": "page@1", "method": "console", "params": {}}),
		serde_json::json!({"id": 2, "result": {"value": 3}}),
	];
	for msg in &messages {
		write_raw(&mut stdout_write, msg).await;
	}

	for expected in &messages {
		let received = rx.recv().await.unwrap();
		assert_eq!(&received, expected);
	}

	drop(stdout_write);
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_large_message() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024 * 1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024 * 1024);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let large_message = serde_json::json!({
		"id": 1,
		"data": "x".repeat(100_000)
	});
	write_raw(&mut stdout_write, &large_message).await;

	let received = rx.recv().await.unwrap();
	assert_eq!(received, large_message);

	drop(stdout_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_malformed_length_prefix() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	// Only 2 of the 4 prefix bytes before EOF.
	stdout_write.write_all(&[0x01, 0x02]).await.unwrap();
	stdout_write.flush().await.unwrap();
	drop(stdout_write);

	let result = transport.run().await;
	assert!(result.unwrap_err().to_string().contains("Failed to read length prefix"));
}

#[tokio::test]
async fn test_truncated_body_is_an_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(&100u32.to_le_bytes()).await.unwrap();
	stdout_write.write_all(b"{\"id\":").await.unwrap();
	drop(stdout_write);

	let err = transport.run().await.unwrap_err();
	assert!(err.to_string().contains("Failed to read message body"));
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
	stdout_write.flush().await.unwrap();

	let err = transport.run().await.unwrap_err();
	assert!(err.to_string().contains("exceeds"));
}

#[tokio::test]
async fn test_eof_at_frame_boundary_is_clean() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	drop(stdout_write);

	let read_task = tokio::spawn(async move { transport.run().await });
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_malformed_json_frame_is_skipped() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();
	let read_task = tokio::spawn(Box::new(receiver).run());

	stdout_write.write_all(&3u32.to_le_bytes()).await.unwrap();
	stdout_write.write_all(b"{{{").await.unwrap();
	let message = serde_json::json!({"id": 7, "result": null});
	write_raw(&mut stdout_write, &message).await;

	assert_eq!(rx.recv().await.unwrap(), message);

	drop(stdout_write);
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_receiver_stops_when_listener_dropped() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, rx) = PipeTransport::new(stdin_write, stdout_read);
	drop(rx);
	let read_task = tokio::spawn(async move { transport.run().await });

	write_raw(&mut stdout_write, &serde_json::json!({"id": 1})).await;

	assert!(read_task.await.unwrap().is_ok());
}
