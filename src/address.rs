//! Transport addresses: an opaque byte identity plus a human-readable text
//! form, and codecs that convert between the two.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

/// Errors produced while parsing or decoding an [`Address`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The text form could not be parsed as a `host:port` or `[ipv6]:port`
    /// socket address.
    #[error("invalid address text: {0}")]
    InvalidText(String),
    /// The byte form was not a recognised encoding.
    #[error("invalid address bytes")]
    InvalidBytes,
}

/// A transport endpoint identity.
///
/// Equality and hashing are structural over the byte form; the text form is
/// carried for logging and configuration but never compared. An `Address` is
/// assigned once, by the local endpoint on bind or by a peer's handshake, and
/// is immutable thereafter.
#[derive(Debug, Clone)]
pub struct Address {
    bytes: Vec<u8>,
    text: String,
}

impl Address {
    /// Construct an address from its byte and text forms directly. Prefer
    /// [`AddressCodec::parse`] or [`AddressCodec::decode`] when the text or
    /// bytes come from an untrusted source.
    #[must_use]
    pub const fn from_parts(bytes: Vec<u8>, text: String) -> Self { Self { bytes, text } }

    /// The opaque byte identity.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }

    /// The human-readable text form.
    #[must_use]
    pub fn as_text(&self) -> &str { &self.text }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool { self.bytes == other.bytes }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) { self.bytes.hash(state); }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.text) }
}

/// Bidirectional conversion between an [`Address`] and the wire/text forms a
/// particular transport uses.
pub trait AddressCodec: Send + Sync {
    /// Parse a user-supplied address string, e.g. from configuration or a
    /// command line.
    ///
    /// # Errors
    /// Returns [`AddressError::InvalidText`] if `text` is not a valid address
    /// for this codec.
    fn parse(&self, text: &str) -> Result<Address, AddressError>;

    /// Decode an address previously produced by [`Self::encode`].
    ///
    /// # Errors
    /// Returns [`AddressError::InvalidBytes`] if `bytes` is not a valid
    /// encoding for this codec.
    fn decode(&self, bytes: &[u8]) -> Result<Address, AddressError>;

    /// Encode an address to its opaque byte form.
    fn encode(&self, address: &Address) -> Vec<u8> { address.as_bytes().to_vec() }
}

/// Codec for TCP/IP addresses in `host:port` (or `[ipv6]:port`) text form.
///
/// The byte form is the IP address family tag, the address octets, and the
/// big-endian port: compact and directly comparable, unlike the variable
/// text rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpAddressCodec;

const TAG_V4: u8 = 4;
const TAG_V6: u8 = 6;

impl TcpAddressCodec {
    fn encode_socket_addr(addr: SocketAddr) -> Vec<u8> {
        let mut out = Vec::with_capacity(19);
        match addr.ip() {
            IpAddr::V4(v4) => {
                out.push(TAG_V4);
                out.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                out.push(TAG_V6);
                out.extend_from_slice(&v6.octets());
            }
        }
        out.extend_from_slice(&addr.port().to_be_bytes());
        out
    }
}

impl AddressCodec for TcpAddressCodec {
    fn parse(&self, text: &str) -> Result<Address, AddressError> {
        let addr: SocketAddr = text
            .parse()
            .map_err(|_| AddressError::InvalidText(text.to_owned()))?;
        Ok(Address::from_parts(Self::encode_socket_addr(addr), addr.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Address, AddressError> {
        let (tag, rest) = bytes.split_first().ok_or(AddressError::InvalidBytes)?;
        let ip_len = match *tag {
            TAG_V4 => 4,
            TAG_V6 => 16,
            _ => return Err(AddressError::InvalidBytes),
        };
        if rest.len() != ip_len + 2 {
            return Err(AddressError::InvalidBytes);
        }
        let ip_bytes = rest.get(..ip_len).ok_or(AddressError::InvalidBytes)?;
        let port_bytes: [u8; 2] = rest
            .get(ip_len..ip_len + 2)
            .ok_or(AddressError::InvalidBytes)?
            .try_into()
            .map_err(|_| AddressError::InvalidBytes)?;
        let port = u16::from_be_bytes(port_bytes);
        let ip = match *tag {
            TAG_V4 => {
                let octets: [u8; 4] = ip_bytes.try_into().map_err(|_| AddressError::InvalidBytes)?;
                IpAddr::from(octets)
            }
            _ => {
                let octets: [u8; 16] = ip_bytes.try_into().map_err(|_| AddressError::InvalidBytes)?;
                IpAddr::from(octets)
            }
        };
        let addr = SocketAddr::new(ip, port);
        Ok(Address::from_parts(bytes.to_vec(), addr.to_string()))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self { Address::from_parts(TcpAddressCodec::encode_socket_addr(addr), addr.to_string()) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("127.0.0.1:5500")]
    #[case("[::1]:5500")]
    #[case("0.0.0.0:0")]
    fn parse_then_encode_then_decode_round_trips(#[case] text: &str) {
        let codec = TcpAddressCodec;
        let addr = codec.parse(text).expect("parse");
        let bytes = codec.encode(&addr);
        let decoded = codec.decode(&bytes).expect("decode");
        assert_eq!(decoded, addr);
    }

    #[test]
    fn equality_is_structural_over_bytes_not_text() {
        let codec = TcpAddressCodec;
        let a = codec.parse("127.0.0.1:5500").expect("parse");
        let b = Address::from_parts(a.as_bytes().to_vec(), "different-text".to_owned());
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_invalid_text() {
        let codec = TcpAddressCodec;
        let err = codec.parse("not-an-address").expect_err("should fail");
        assert!(matches!(err, AddressError::InvalidText(_)));
    }

    #[test]
    fn rejects_malformed_bytes() {
        let codec = TcpAddressCodec;
        let err = codec.decode(&[9, 1, 2, 3]).expect_err("should fail");
        assert_eq!(err, AddressError::InvalidBytes);
    }
}
