use crate::probe::{Context, ProbeClass, ProbeError, ProbeErrorKind, ProbeResult, ProbeTarget};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Used when the context carries no timeout; `connect_timeout` rejects zero.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Succeeds when a TCP connection to `host:port` can be established.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl ProbeTarget for TcpProbe {
    fn execute(&self, ctx: &Context) -> ProbeResult {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|err| {
                ProbeError::new(ProbeErrorKind::Dns, format!("resolve {}: {err}", self.addr))
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ProbeError::new(
                ProbeErrorKind::Dns,
                format!("resolve {}: no addresses", self.addr),
            ));
        }

        let timeout = if ctx.timeout().is_zero() {
            FALLBACK_TIMEOUT
        } else {
            ctx.timeout()
        };

        let mut last_err = None;
        for addr in addrs {
            if ctx.is_cancelled() {
                return Err(ProbeError::cancelled());
            }
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return Ok(()),
                Err(err) => last_err = Some(connect_error(addr, err)),
            }
        }
        Err(last_err.unwrap_or_else(|| ProbeError::failed("no address attempted")))
    }
}

impl From<TcpProbe> for ProbeClass {
    fn from(probe: TcpProbe) -> Self {
        ProbeClass::new(probe).with_class("tcp")
    }
}

fn connect_error(addr: SocketAddr, err: io::Error) -> ProbeError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeErrorKind::ConnectTimeout,
        io::ErrorKind::ConnectionRefused => ProbeErrorKind::ConnectRefused,
        _ => ProbeErrorKind::ConnectOther,
    };
    ProbeError::new(kind, format!("connect {addr}: {err}"))
}
