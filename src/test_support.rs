//! One-shot HTTP server for exercising the wire format of the HTTP clients

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request as it arrived on the socket
#[derive(Debug)]
pub(crate) struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Answer one connection per entry of `responses` (status, JSON body), in order.
///
/// Returns the server's base URL and a handle yielding the captured requests.
pub(crate) async fn serve(
    responses: Vec<(u16, String)>,
) -> (String, JoinHandle<Vec<CapturedRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);

            captured.push(read_request(&mut reader).await);

            let response = format!(
                "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            write.write_all(response.as_bytes()).await.unwrap();
            write.shutdown().await.ok();
        }
        captured
    });

    (base_url, handle)
}

async fn read_request<R>(reader: &mut BufReader<R>) -> CapturedRequest
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };

    let mut body = Vec::new();
    if let Some(length) = header("content-length") {
        body.resize(length.parse::<usize>().unwrap(), 0);
        reader.read_exact(&mut body).await.unwrap();
    } else if header("transfer-encoding").as_deref() == Some("chunked") {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await.unwrap();
            let size_hex = size_line.trim().split(';').next().unwrap_or("0");
            let size = usize::from_str_radix(size_hex, 16).unwrap();
            let mut chunk = vec![0; size];
            reader.read_exact(&mut chunk).await.unwrap();
            let mut crlf = String::new();
            reader.read_line(&mut crlf).await.unwrap();
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk);
        }
    }

    CapturedRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body,
    }
}
