//! Per-application country restrictions.
//!
//! An application with no country rules is unrestricted. Once rules exist the
//! check fails closed: missing GeoIP, an unusable client IP, or an unresolved
//! country all deny. Private and loopback addresses always pass so internal
//! traffic and health checks keep working.

use std::net::IpAddr;
use tracing::debug;

use super::model::CountryCode;
use crate::store::GeoIpLookup;

pub const MSG_GEOIP_DISABLED: &str =
    "GeoIP database not configured while country restrictions are enabled.";
pub const MSG_NO_CLIENT_IP: &str = "Unable to determine client IP address for country validation.";
pub const MSG_UNRESOLVED_COUNTRY: &str = "Could not resolve country for the provided IP address.";
pub const MSG_RULES_UNAVAILABLE: &str = "Could not load country restrictions for this application.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CountryVerdict {
    Allowed,
    Denied(String),
}

impl CountryVerdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Decide whether `client_ip` may reach an application restricted to `rules`.
#[must_use]
pub fn check_country_access(
    rules: &[CountryCode],
    client_ip: &str,
    geoip: &dyn GeoIpLookup,
) -> CountryVerdict {
    if rules.is_empty() {
        return CountryVerdict::Allowed;
    }

    if !geoip.is_enabled() {
        return CountryVerdict::Denied(MSG_GEOIP_DISABLED.to_string());
    }

    let Ok(ip) = client_ip.trim().parse::<IpAddr>() else {
        return CountryVerdict::Denied(MSG_NO_CLIENT_IP.to_string());
    };

    if is_private_or_loopback(ip) {
        debug!("Skipping country check for internal address {ip}");
        return CountryVerdict::Allowed;
    }

    let country = match geoip.lookup_country(ip) {
        Ok(Some(country)) if !country.trim().is_empty() => country,
        Ok(_) => return CountryVerdict::Denied(MSG_UNRESOLVED_COUNTRY.to_string()),
        Err(err) => {
            debug!("GeoIP lookup failed for {ip}: {err}");
            return CountryVerdict::Denied(MSG_UNRESOLVED_COUNTRY.to_string());
        }
    };

    if rules.iter().any(|rule| rule.matches(&country)) {
        CountryVerdict::Allowed
    } else {
        CountryVerdict::Denied(format!(
            "Access from country '{country}' is not allowed for this application."
        ))
    }
}

/// RFC 1918 / RFC 4193 private ranges and loopback, IPv4-mapped addresses included.
#[must_use]
pub fn is_private_or_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_private() || v4.is_loopback(),
            None => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
        },
    }
}
