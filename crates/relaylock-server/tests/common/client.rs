//! Line based test client for the client protocol

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use super::WAIT;

pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect client");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("write frame");
    }

    /// Next frame, or `None` once the server closed the connection
    pub async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("no frame from server")
            .ok()
            .flatten()
    }

    pub async fn request(&mut self, line: &str) -> Option<String> {
        self.send(line).await;
        self.recv().await
    }
}
