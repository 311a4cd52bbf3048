//! Port readiness - block until a TCP listener accepts connections

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// `connect_timeout` rejects a zero duration.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1);

/// Where and how long to poll for a listening socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ProbeTarget {
    /// Build a target, checking `0 < poll_interval <= timeout`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
        poll_interval: Duration,
    ) -> E2eResult<Self> {
        if timeout.is_zero() {
            return Err(E2eError::InvalidConfig(
                "readiness timeout must be greater than zero".to_string(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(E2eError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if poll_interval > timeout {
            return Err(E2eError::InvalidConfig(format!(
                "poll interval {:?} exceeds timeout {:?}",
                poll_interval, timeout
            )));
        }

        Ok(Self {
            host: host.into(),
            port,
            timeout,
            poll_interval,
        })
    }

    /// `host:port` as used in log lines and errors
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Poll until the port accepts a connection or the timeout elapses.
    ///
    /// At least one connection attempt is always made, even when the
    /// remaining budget is already zero.
    pub fn wait(&self) -> E2eResult<()> {
        self.wait_with(|| Ok(()))
    }

    /// Like [`wait`](Self::wait), running `between_attempts` after every
    /// failed attempt. An error from it aborts the wait.
    pub fn wait_with<F>(&self, mut between_attempts: F) -> E2eResult<()>
    where
        F: FnMut() -> E2eResult<()>,
    {
        let start = Instant::now();
        let mut attempts = 0usize;
        let mut last_error = String::from("no connection attempted");

        info!("Waiting for {} to accept connections", self.addr());

        loop {
            attempts += 1;
            let remaining = self.timeout.saturating_sub(start.elapsed());
            let attempt_timeout = self.poll_interval.min(remaining).max(MIN_ATTEMPT_TIMEOUT);

            match connect_once(&self.host, self.port, attempt_timeout) {
                Ok(()) => {
                    info!(
                        "{} is accepting connections ({} attempt(s), {} ms)",
                        self.addr(),
                        attempts,
                        start.elapsed().as_millis()
                    );
                    return Ok(());
                }
                Err(e) => {
                    if attempts == 1 {
                        debug!("{} not ready yet: {}", self.addr(), e);
                    }
                    last_error = e.to_string();
                }
            }

            between_attempts()?;

            let remaining = self.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            sleep(self.poll_interval.min(remaining));
        }

        Err(E2eError::PortTimeout {
            addr: self.addr(),
            waited: start.elapsed(),
            attempts,
            last_error,
        })
    }
}

/// Block until `host:port` accepts a TCP connection, or fail with
/// [`E2eError::PortTimeout`] carrying the last connection error.
pub fn wait_for_port(
    host: &str,
    port: u16,
    timeout: Duration,
    poll_interval: Duration,
) -> E2eResult<()> {
    ProbeTarget::new(host, port, timeout, poll_interval)?.wait()
}

/// Single connection attempt, no retries.
pub fn port_is_open(host: &str, port: u16, timeout: Duration) -> bool {
    connect_once(host, port, timeout.max(MIN_ATTEMPT_TIMEOUT)).is_ok()
}

/// Poll until connections to `host:port` are refused. Returns whether the
/// port was released before `timeout`.
pub fn wait_for_port_closed(
    host: &str,
    port: u16,
    timeout: Duration,
    poll_interval: Duration,
) -> bool {
    let start = Instant::now();
    loop {
        if !port_is_open(host, port, poll_interval) {
            return true;
        }
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return false;
        }
        sleep(poll_interval.min(remaining));
    }
}

/// One pass over every resolved address. `timeout` is the budget for the
/// whole pass, shared evenly between the addresses.
fn connect_once(host: &str, port: u16, timeout: Duration) -> io::Result<()> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{}:{} did not resolve to any address", host, port),
        ));
    }

    let per_addr = (timeout / addrs.len() as u32).max(MIN_ATTEMPT_TIMEOUT);
    let mut last_err = None;

    for addr in &addrs {
        match TcpStream::connect_timeout(addr, per_addr) {
            Ok(_stream) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let err = ProbeTarget::new("127.0.0.1", 8000, Duration::from_secs(1), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_poll_interval_longer_than_timeout() {
        let err = ProbeTarget::new(
            "127.0.0.1",
            8000,
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
        .unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(_)));
    }

    #[test]
    fn test_open_port_returns_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let start = Instant::now();
        wait_for_port(
            "127.0.0.1",
            port,
            Duration::from_secs(5),
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_timeout_reports_address_and_last_error() {
        let port = closed_port();
        let err = wait_for_port(
            "127.0.0.1",
            port,
            Duration::from_millis(150),
            Duration::from_millis(50),
        )
        .unwrap_err();

        match err {
            E2eError::PortTimeout { addr, attempts, last_error, .. } => {
                assert_eq!(addr, format!("127.0.0.1:{}", port));
                assert!(attempts >= 2);
                assert_ne!(last_error, "no connection attempted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_is_open("127.0.0.1", port, Duration::from_millis(200)));

        drop(listener);
        assert!(!port_is_open("127.0.0.1", port, Duration::from_millis(200)));
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        wait_for_port("127.0.0.1", port, Duration::MAX, Duration::from_millis(100)).unwrap();

        drop(listener);
        assert!(wait_for_port_closed(
            "127.0.0.1",
            port,
            Duration::MAX,
            Duration::from_millis(50)
        ));
    }

    #[test]
    fn test_connect_budget_is_shared_between_addresses() {
        let port = closed_port();
        let start = Instant::now();
        // localhost may resolve to both ::1 and 127.0.0.1
        assert!(connect_once("localhost", port, Duration::from_millis(200)).is_err());
        assert!(start.elapsed() < Duration::from_millis(200) + Duration::from_millis(100));
    }

    #[test]
    fn test_localhost_resolves_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_is_open("localhost", port, Duration::from_millis(500)));
    }
}
