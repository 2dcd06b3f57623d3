use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::errors::C3Error;

/// Connection settings for one robot's C3 endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct C3ClientConfig {
    /// `host:port` of the C3 bridge on the robot controller.
    pub addr: String,
    /// Delay between reconnect attempts.
    pub retry_timeout: Duration,
}

impl C3ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            retry_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<(), C3Error> {
        if self.addr.is_empty() {
            return Err(C3Error::AddressResolve("address cannot be empty".into()));
        }
        self.resolve()?;
        Ok(())
    }

    /// Resolves the configured address to a socket address.
    pub fn resolve(&self) -> Result<SocketAddr, C3Error> {
        self.addr
            .to_socket_addrs()
            .map_err(|err| C3Error::AddressResolve(format!("{}: {err}", self.addr)))?
            .next()
            .ok_or_else(|| {
                C3Error::AddressResolve(format!("{} resolves to no address", self.addr))
            })
    }
}

impl Default for C3ClientConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:7000")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_ip() {
        let config = C3ClientConfig::new("127.0.0.1:7001");
        assert_eq!(config.resolve().unwrap().port(), 7001);
    }

    #[test]
    fn rejects_empty_address() {
        let config = C3ClientConfig::new("");
        assert!(config.validate().is_err());
    }
}
