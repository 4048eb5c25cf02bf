//! `MaxMind` GeoIP2/GeoLite2 country database adapter.

use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::{net::IpAddr, path::Path};
use tracing::{info, warn};

use super::{GeoIpLookup, LookupError, LookupResult};

/// Country lookups backed by an `.mmdb` file, or disabled when none is configured.
pub enum MaxMindGeoIp {
    Disabled,
    Enabled(Reader<Vec<u8>>),
}

impl MaxMindGeoIp {
    /// Open the database at `path`.
    ///
    /// A missing path or an unreadable database leaves GeoIP disabled; any app
    /// with country rules is then denied by the country check.
    #[must_use]
    pub fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("GeoIP database path not configured, country lookups disabled");
            return Self::Disabled;
        };

        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!("Loaded GeoIP database {}", path.display());
                Self::Enabled(reader)
            }
            Err(err) => {
                warn!("Failed to open GeoIP database {}: {err}", path.display());
                Self::Disabled
            }
        }
    }
}

impl GeoIpLookup for MaxMindGeoIp {
    fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    fn lookup_country(&self, ip: IpAddr) -> LookupResult<String> {
        let Self::Enabled(reader) = self else {
            return Err(LookupError::Backend("geoip not configured".to_string()));
        };

        match reader.lookup::<geoip2::Country>(ip) {
            Ok(record) => Ok(record
                .country
                .and_then(|country| country.iso_code)
                .map(str::to_string)),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(err) => Err(LookupError::Backend(format!(
                "failed to lookup country: {err}"
            ))),
        }
    }
}
