use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use homehub_app::ports::{Connection, NetworkDriver, TransportError};
use homehub_domain::device::ConnectionInfo;

pub const NETWORK_KIND: &str = "fluxwifi";

const DEFAULT_PORT: u16 = 5577;

/// Plain TCP to the bulb. No handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpNetwork;

#[async_trait]
impl NetworkDriver for TcpNetwork {
    fn kind(&self) -> &str {
        NETWORK_KIND
    }

    async fn dial(&self, info: &ConnectionInfo) -> Result<Box<dyn Connection>, TransportError> {
        let address = if info.address.contains(':') {
            info.address.clone()
        } else {
            format!("{}:{DEFAULT_PORT}", info.address)
        };
        tracing::debug!(%address, "dialing flux bulb");
        let stream = TcpStream::connect(address.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(BulbConnection { stream }))
    }
}

struct BulbConnection {
    stream: TcpStream,
}

#[async_trait]
impl Connection for BulbConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame).await?;
        Ok(())
    }

    async fn is_alive(&mut self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => return false,
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn should_write_raw_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let info = ConnectionInfo::new(NETWORK_KIND, listener.local_addr().unwrap().to_string());
        let bulb = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut conn = TcpNetwork.dial(&info).await.unwrap();
        assert!(conn.is_alive().await);
        conn.send(&[0x71, 0x23, 0x0f, 0xa3]).await.unwrap();
        drop(conn);

        assert_eq!(bulb.await.unwrap(), [0x71, 0x23, 0x0f, 0xa3]);
    }

    #[tokio::test]
    async fn should_fail_to_dial_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let info = ConnectionInfo::new(NETWORK_KIND, address);
        let err = TcpNetwork.dial(&info).await.err().unwrap();
        assert!(matches!(err, TransportError::Io(_)), "{err}");
    }
}
