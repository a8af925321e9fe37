//! Telnet network driver: TCP plus the bridge's login handshake.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use homehub_app::ports::{Connection, NetworkDriver, TransportError};
use homehub_domain::device::ConnectionInfo;

use crate::error::LutronError;

pub const NETWORK_KIND: &str = "lutron";

const DEFAULT_PORT: u16 = 23;
const DEFAULT_LOGIN: &str = "lutron";
const DEFAULT_PASSWORD: &str = "integration";

const LOGIN_PROMPT: &str = "login: ";
const PASSWORD_PROMPT: &str = "password: ";
const READY_PROMPT: &str = "GNET> ";
const BAD_LOGIN: &str = "bad login";

/// Dials bridges and logs in with the descriptor's credentials, falling
/// back to the factory integration account.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelnetNetwork;

#[async_trait]
impl NetworkDriver for TelnetNetwork {
    fn kind(&self) -> &str {
        NETWORK_KIND
    }

    async fn dial(&self, info: &ConnectionInfo) -> Result<Box<dyn Connection>, TransportError> {
        let address = with_default_port(&info.address);
        tracing::debug!(%address, "dialing lutron bridge");
        let stream = TcpStream::connect(address.as_str()).await?;
        stream.set_nodelay(true)?;
        let mut conn = TelnetConnection { stream };
        conn.login(
            info.login.as_deref().unwrap_or(DEFAULT_LOGIN),
            info.password.as_deref().unwrap_or(DEFAULT_PASSWORD),
        )
        .await?;
        tracing::info!(%address, "logged in to lutron bridge");
        Ok(Box::new(conn))
    }
}

fn with_default_port(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_PORT}")
    }
}

struct TelnetConnection {
    stream: TcpStream,
}

impl TelnetConnection {
    async fn login(&mut self, login: &str, password: &str) -> Result<(), LutronError> {
        self.expect(LOGIN_PROMPT).await?;
        self.stream.write_all(format!("{login}\r\n").as_bytes()).await?;
        self.expect(PASSWORD_PROMPT).await?;
        self.stream.write_all(format!("{password}\r\n").as_bytes()).await?;
        match self.expect(READY_PROMPT).await {
            Ok(()) => Ok(()),
            Err(LutronError::BadLogin(_)) => Err(LutronError::BadLogin(login.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Read until `prompt` shows up. A `bad login` reply aborts the wait.
    async fn expect(&mut self, prompt: &'static str) -> Result<(), LutronError> {
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let read = self.stream.read(&mut buf).await?;
            if read == 0 {
                return Err(LutronError::UnexpectedEof(prompt));
            }
            seen.extend_from_slice(&buf[..read]);
            let text = String::from_utf8_lossy(&seen);
            if text.to_ascii_lowercase().contains(BAD_LOGIN) {
                return Err(LutronError::BadLogin(String::new()));
            }
            if text.contains(prompt) {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Connection for TelnetConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame).await?;
        Ok(())
    }

    /// Drains whatever monitoring output the bridge pushed while idle; a
    /// zero-length read means the bridge hung up.
    async fn is_alive(&mut self) -> bool {
        let mut buf = [0u8; 512];
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
