use std::fmt;
use std::str::FromStr;

use super::TelescopeError;

/// `name:TCP:host:port:delay_us`
///
/// `delay_us` is how far behind "now" positions are shown, which smooths
/// over the latency of the telescope server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelescopeUrl {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub delay_us: i64,
}

impl FromStr for TelescopeUrl {
    type Err = TelescopeError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| TelescopeError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let mut parts = url.splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        let kind = parts.next().ok_or_else(|| invalid("missing telescope kind"))?;
        let params = parts.next().ok_or_else(|| invalid("missing connection parameters"))?;

        if name.is_empty() {
            return Err(invalid("empty telescope name"));
        }
        if kind != "TCP" {
            return Err(TelescopeError::UnsupportedKind(kind.to_string()));
        }

        // host may itself hold colons (IPv6), so parse from the right
        let mut tail = params.rsplitn(3, ':');
        let delay = tail.next().ok_or_else(|| invalid("missing delay"))?;
        let port = tail.next().ok_or_else(|| invalid("missing port"))?;
        let host = tail.next().ok_or_else(|| invalid("missing host"))?.trim();
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port: u16 = port.trim().parse().map_err(|_| invalid("bad port"))?;
        let delay_us: i64 = delay.trim().parse().map_err(|_| invalid("bad delay"))?;
        if port == 0 {
            return Err(invalid("bad port"));
        }
        if delay_us < 0 {
            return Err(invalid("negative delay"));
        }

        Ok(Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            delay_us,
        })
    }
}

impl fmt::Display for TelescopeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:TCP:{}:{}:{}", self.name, self.host, self.port, self.delay_us)
    }
}
