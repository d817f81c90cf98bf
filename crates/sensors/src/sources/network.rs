//! Network address of the vehicle, read from the host interfaces.

use std::net::IpAddr;

use smartrc_protocol::SensorValue;

use crate::error::SensorError;
use crate::sensor::SensorSource;

/// The vehicle's own address, as controllers should dial it.
#[derive(Debug, Default)]
pub struct IpAddress;

impl SensorSource for IpAddress {
    fn read(&self) -> Result<SensorValue, SensorError> {
        let interfaces = if_addrs::get_if_addrs()
            .map_err(|e| SensorError::Read(format!("listing interfaces: {e}")))?;
        pick_address(interfaces.iter().map(|iface| iface.ip()))
            .map(|ip| SensorValue::Text(ip.to_string()))
            .ok_or_else(|| SensorError::Unavailable("no routable interface".into()))
    }
}

/// First non-loopback IPv4 address, else the first global-looking IPv6 one.
fn pick_address(candidates: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut fallback = None;
    for ip in candidates {
        match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => return Some(ip),
            IpAddr::V6(v6)
                if fallback.is_none()
                    && !v6.is_loopback()
                    && !v6.is_unspecified()
                    && (v6.segments()[0] & 0xffc0) != 0xfe80 =>
            {
                fallback = Some(ip);
            }
            _ => {}
        }
    }
    fallback
}
