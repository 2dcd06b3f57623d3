use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use kuka_c3::drivers::{C3Client, C3ClientConfig};
use kuka_c3::errors::C3Error;
use kuka_c3::messages::wire::{put_utf16, take_frame};
use kuka_c3::messages::{C3Message, C3VariableName};

fn single_read_response(tag: u16, value: &str) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&tag.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.push(4);
    put_utf16(&mut frame, value);
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.push(1);
    let body_len = (frame.len() - 4) as u16;
    frame[2..4].copy_from_slice(&body_len.to_be_bytes());
    frame
}

async fn read_requests(stream: &mut TcpStream, count: usize) -> Vec<Vec<u8>> {
    let mut assembly = Vec::new();
    let mut chunk = [0u8; 2048];
    let mut frames = Vec::new();
    while frames.len() < count {
        let n = stream.read(&mut chunk).await.unwrap();
        assert_ne!(n, 0, "client hung up early");
        assembly.extend_from_slice(&chunk[..n]);
        while let Some(frame) = take_frame(&mut assembly) {
            frames.push(frame);
        }
    }
    frames
}

fn frame_tag(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[0], frame[1]])
}

#[tokio::test]
async fn responses_correlate_by_tag_not_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let responder = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frames = read_requests(&mut stream, 2).await;
        let first_tag = frame_tag(&frames[0]);
        let second_tag = frame_tag(&frames[1]);

        // Answer in reverse order, splitting the second answer across two
        // writes to exercise frame reassembly.
        stream
            .write_all(&single_read_response(second_tag, "second"))
            .await
            .unwrap();
        let first_response = single_read_response(first_tag, "first");
        let (head, tail) = first_response.split_at(3);
        stream.write_all(head).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_all(tail).await.unwrap();
        stream
    });

    let client = C3Client::new(C3ClientConfig::new(&addr)).unwrap();
    let message_a = C3Message::read(100, &[C3VariableName::AxisAct]).unwrap();
    let message_b = C3Message::read(200, &[C3VariableName::PosAct]).unwrap();

    let (result_a, result_b) = tokio::join!(
        client.transact(message_a, Duration::from_secs(3)),
        client.transact(message_b, Duration::from_secs(3)),
    );

    let response_a = result_a.unwrap();
    let response_b = result_b.unwrap();
    assert_eq!(response_a.variables()[0].value.as_deref(), Some("first"));
    assert_eq!(response_b.variables()[0].value.as_deref(), Some("second"));

    let _stream = responder.await.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let silent = tokio::spawn(async move { listener.accept().await.unwrap() });

    let client = C3Client::new(C3ClientConfig::new(&addr)).unwrap();
    let message = C3Message::read(5, &[C3VariableName::AxisAct]).unwrap();
    let result = client.transact(message, Duration::from_millis(300)).await;
    assert_eq!(result.unwrap_err(), C3Error::RequestTimeout);

    let _ = silent.await;
    client.shutdown().await;
}

#[tokio::test]
async fn client_recovers_when_the_endpoint_comes_up_late() {
    // Reserve a port, then close the listener so the first dial fails.
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = placeholder.local_addr().unwrap();
    drop(placeholder);

    let mut config = C3ClientConfig::new(addr.to_string());
    config.retry_timeout = Duration::from_millis(200);
    let client = C3Client::new(config).unwrap();

    // Nothing listening yet: the request dies on its deadline.
    let message = C3Message::read(8, &[C3VariableName::AxisAct]).unwrap();
    let result = client.transact(message, Duration::from_millis(300)).await;
    assert_eq!(result.unwrap_err(), C3Error::RequestTimeout);

    // Bring the endpoint up; the retry loop connects within a few cycles.
    // The stale first frame is also flushed on reconnect, so answer every
    // frame: the abandoned tag's response is dropped by the demultiplexer.
    let listener = TcpListener::bind(addr).await.unwrap();
    let responder = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut assembly = Vec::new();
        let mut chunk = [0u8; 2048];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            assembly.extend_from_slice(&chunk[..n]);
            while let Some(frame) = take_frame(&mut assembly) {
                let tag = frame_tag(&frame);
                if stream
                    .write_all(&single_read_response(tag, "recovered"))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(600)).await;
    let message = C3Message::read(9, &[C3VariableName::AxisAct]).unwrap();
    let response = client
        .transact(message, Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(response.variables()[0].value.as_deref(), Some("recovered"));

    client.shutdown().await;
    let _ = responder.await;
}
