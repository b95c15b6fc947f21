//! End-to-end exercise of the real `axum` app (components F and H) rather
//! than the session machinery directly: a loopback echo target, a live
//! `axum::serve` instance, and a hand-rolled HTTP/1.1 client reading the
//! chunked response body byte-for-byte. Mirrors scenario E2 of spec.md §8
//! (V-PROTO over XHTTP, GET-before-POST).

use std::sync::Arc;

use relaycore::http;
use relaycore::state::AppState;
use relaycore::config::Config;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const ID: [u8; 16] = [
    0x0d, 0x33, 0x68, 0x57, 0xc2, 0xb9, 0x45, 0xb0, 0x8c, 0x67, 0x0b, 0x0b, 0x58, 0xe9, 0xc9, 0xd2,
];

fn test_config() -> Config {
    Config {
        uuid_str: "0d336857-c2b9-45b0-8c67-0b0b58e9c9d2".to_string(),
        uuid_bytes: ID,
        port: 0,
        wspath: "0d336857".to_string(),
    }
}

fn vproto_frame(port: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x00];
    buf.extend_from_slice(&ID);
    buf.push(0x00); // option length 0
    buf.push(0x01); // command byte
    buf.extend_from_slice(&port.to_be_bytes());
    buf.push(1); // atyp ipv4
    buf.extend_from_slice(&[127, 0, 0, 1]);
    buf.extend_from_slice(payload);
    buf
}

/// A loopback TCP echo server: every byte received is written straight back.
async fn spawn_echo_target() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    port
}

async fn spawn_gateway() -> std::net::SocketAddr {
    let state = AppState {
        config: Arc::new(test_config()),
    };
    let app = axum::Router::new()
        .fallback(http::root_handler)
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Reads HTTP/1.1 response headers off `reader`, discarding them, leaving
/// the stream positioned at the start of the (chunked) body.
async fn skip_headers(reader: &mut BufReader<TcpStream>) {
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        if line == "\r\n" || line.is_empty() {
            break;
        }
    }
}

/// Reads one chunked-transfer-encoding chunk and returns its payload bytes.
async fn read_chunk(reader: &mut BufReader<TcpStream>) -> Vec<u8> {
    let mut size_line = String::new();
    reader.read_line(&mut size_line).await.unwrap();
    let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
    let mut data = vec![0u8; size];
    reader.read_exact(&mut data).await.unwrap();
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await.unwrap();
    data
}

#[tokio::test]
async fn get_before_post_delivers_handshake_then_payload_on_get_e2() {
    let target_port = spawn_echo_target().await;
    let gateway_addr = spawn_gateway().await;

    // GET first, held open as the downstream half.
    let get_stream = TcpStream::connect(gateway_addr).await.unwrap();
    let mut get_reader = BufReader::new(get_stream);
    get_reader
        .get_mut()
        .write_all(b"GET /0d336857/abc123 HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();
    skip_headers(&mut get_reader).await;

    // POST carries the V-PROTO header + initial payload as body, with a
    // Content-Length so it completes via Ack/Divert once GET is bound.
    let frame = vproto_frame(target_port, b"hello-through-xhttp");
    let mut post_stream = TcpStream::connect(gateway_addr).await.unwrap();
    let request = format!(
        "POST /0d336857/abc123 HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
        frame.len()
    );
    post_stream.write_all(request.as_bytes()).await.unwrap();
    post_stream.write_all(&frame).await.unwrap();

    // Ack/Divert: the POST response completes promptly with an empty body.
    let mut post_reader = BufReader::new(post_stream);
    let mut post_status = String::new();
    post_reader.read_line(&mut post_status).await.unwrap();
    assert!(post_status.starts_with("HTTP/1.1 200"));

    // The GET stream carries the handshake, then the echoed payload.
    let handshake = read_chunk(&mut get_reader).await;
    assert_eq!(handshake, vec![0x00, 0x00]);

    let echoed = read_chunk(&mut get_reader).await;
    assert_eq!(echoed, b"hello-through-xhttp".to_vec());
}
