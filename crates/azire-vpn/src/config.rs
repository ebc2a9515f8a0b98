//! Tunnel Configuration
//!
//! Renders the wg-quick style configuration file handed to the tunnel
//! service. The file combines our private key with the peer parameters
//! returned by key registration.

use crate::keys::KeyPair;
use azire_network::Registration;
use std::fmt;

/// Route everything, both address families, through the tunnel
pub const ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// A rendered-on-demand tunnel configuration
#[derive(Clone)]
pub struct TunnelConfig {
    /// Our private key (base64)
    pub private_key: String,
    /// Interface address(es) in CIDR notation
    pub address: String,
    /// DNS servers to use inside the tunnel
    pub dns: String,
    /// Peer public key (base64)
    pub peer_public_key: String,
    /// Peer endpoint as `host:port`
    pub endpoint: String,
}

impl TunnelConfig {
    /// Combine our keypair with a registration response
    pub fn new(keypair: &KeyPair, registration: &Registration) -> Self {
        Self {
            private_key: keypair.private.to_base64(),
            address: registration.address.clone(),
            dns: registration.dns.clone(),
            peer_public_key: registration.public_key.clone(),
            endpoint: registration.endpoint.clone(),
        }
    }

    /// Render the configuration file contents
    pub fn render(&self) -> String {
        format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             Address = {}\n\
             DNS = {}\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}\n\
             AllowedIPs = {}\n",
            self.private_key,
            self.address,
            self.dns,
            self.peer_public_key,
            self.endpoint,
            ALLOWED_IPS,
        )
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("address", &self.address)
            .field("dns", &self.dns)
            .field("peer_public_key", &self.peer_public_key)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration {
            address: "10.0.0.2/32".into(),
            dns: "193.180.164.1".into(),
            public_key: "peerkey=".into(),
            endpoint: "se1.wg.azirevpn.net:51820".into(),
        }
    }

    #[test]
    fn test_render_format() {
        let keypair = KeyPair::generate();
        let config = TunnelConfig::new(&keypair, &registration());

        let expected = format!(
            "[Interface]\nPrivateKey = {}\nAddress = 10.0.0.2/32\nDNS = 193.180.164.1\n\n\
             [Peer]\nPublicKey = peerkey=\nEndpoint = se1.wg.azirevpn.net:51820\nAllowedIPs = 0.0.0.0/0, ::/0\n",
            keypair.private.to_base64()
        );
        assert_eq!(config.render(), expected);
    }

    #[test]
    fn test_debug_hides_private_key() {
        let keypair = KeyPair::generate();
        let config = TunnelConfig::new(&keypair, &registration());
        assert!(!format!("{:?}", config).contains(&keypair.private.to_base64()));
    }
}
