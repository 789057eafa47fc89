// # natter-srv-testkit
//
// One-shot HTTP server used by the provider and IP lookup tests. It accepts
// a single connection, reads the full request (headers plus any
// `content-length` body), answers with a canned response and hands the raw
// request back for assertions.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one JSON response
///
/// Returns the base URL (`http://127.0.0.1:<port>`) and a handle resolving
/// to the request as received.
pub async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
    serve_once_with(status_line, "application/json", body).await
}

/// Serve one response with an explicit content type
pub async fn serve_once_with(
    status_line: &str,
    content_type: &str,
    body: &str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener has an address");
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status_line,
        content_type,
        body.len(),
        body
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept one connection");
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = socket.read(&mut buf).await.expect("read request");
            request.extend_from_slice(&buf[..n]);

            if let Some(end) = request_len(&request)
                && request.len() >= end
            {
                break;
            }
            if n == 0 {
                break;
            }
        }

        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).to_string()
    });

    (format!("http://{}", addr), handle)
}

/// Total length of the request once its headers are complete
fn request_len(request: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(request);
    let split = text.find("\r\n\r\n")?;
    let content_length = text[..split]
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    Some(split + 4 + content_length)
}
