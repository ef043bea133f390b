use actix_web::dev::ServiceRequest;
use actix_web::http::StatusCode;
use actix_web::ResponseError;
use std::net::{AddrParseError, IpAddr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Component used when the request carries no client address at all.
const UNKNOWN_ADDRESS: &str = "unknown";

/// The request attributes a key may be derived from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RequestDescriptor {
    /// Client address, as reported by the connection or a trusted proxy.
    pub client_address: Option<String>,
    pub method: String,
    /// Matched route pattern, or the raw path when no route matched.
    pub route: String,
}

impl RequestDescriptor {
    /// # Security
    ///
    /// The client address comes from
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr)
    /// which is only suitable for applications deployed behind a proxy that you control.
    pub fn from_request(req: &ServiceRequest) -> Self {
        Self {
            client_address: req
                .connection_info()
                .realip_remote_addr()
                .map(ToOwned::to_owned),
            method: req.method().as_str().to_owned(),
            route: req
                .match_pattern()
                .unwrap_or_else(|| req.path().to_owned()),
        }
    }
}

/// How a profile turns a request into a key.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeyShape {
    /// `{clientAddress}_{method}_{route}`
    Route,
    /// `{prefix}{clientAddress}`, independent of method and path.
    ClientAddress { prefix: &'static str },
}

impl KeyShape {
    pub fn derive(&self, request: &RequestDescriptor) -> Result<String, KeyError> {
        let address = match &request.client_address {
            Some(address) => ip_key(address)?,
            None => UNKNOWN_ADDRESS.to_owned(),
        };
        Ok(match self {
            KeyShape::Route => format!("{address}_{}_{}", request.method, request.route),
            KeyShape::ClientAddress { prefix } => format!("{prefix}{address}"),
        })
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Unable to parse remote IP address: {0}")]
    InvalidAddress(
        #[source]
        #[from]
        AddrParseError,
    ),
}

impl ResponseError for KeyError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
fn ip_key(address: &str) -> Result<String, KeyError> {
    let ip = match address.parse::<IpAddr>() {
        Ok(ip) => ip,
        // Forwarded headers may carry a port.
        Err(e) => address.parse::<SocketAddr>().map(|s| s.ip()).map_err(|_| e)?,
    };
    Ok(match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return Ok(v4.to_string());
            }
            let s = v6.segments();
            let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            format!("{subnet}/64")
        }
    })
}
