//! Pure, side-effect-free enrichment: IP → geo, user-agent → device.
//! Never throws; a miss or malformed input produces empty fields.

use crate::types::{Device, DeviceType, Geo};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::str::FromStr;

/// One entry of the embedded IP-to-geo table: a CIDR-ish prefix match
/// against documented test/demo ranges plus a handful of large public
/// allocations, enough to exercise the geo pipeline without a network
/// lookup or a vendored database.
struct GeoBlock {
    prefix: &'static str,
    country: &'static str,
    region: &'static str,
    city: &'static str,
}

const GEO_TABLE: &[GeoBlock] = &[
    GeoBlock { prefix: "1.1.1.", country: "AU", region: "Queensland", city: "Brisbane" },
    GeoBlock { prefix: "8.8.8.", country: "US", region: "California", city: "Mountain View" },
    GeoBlock { prefix: "8.8.4.", country: "US", region: "California", city: "Mountain View" },
    GeoBlock { prefix: "9.9.9.", country: "US", region: "California", city: "Berkeley" },
    GeoBlock { prefix: "185.228.168.", country: "DE", region: "Hesse", city: "Frankfurt" },
    GeoBlock { prefix: "193.0.14.", country: "NL", region: "North Holland", city: "Amsterdam" },
    GeoBlock { prefix: "103.", country: "SG", region: "Singapore", city: "Singapore" },
    GeoBlock { prefix: "198.51.100.", country: "US", region: "Virginia", city: "Ashburn" },
    GeoBlock { prefix: "203.0.113.", country: "AU", region: "New South Wales", city: "Sydney" },
];

/// Looks up geographic attributes for a visitor IP. Loopback and private
/// addresses, as well as anything not in the embedded table, resolve to
/// all-empty fields -- this is a best-effort enrichment, not ground truth.
pub fn geo_of(ip: Option<&str>) -> Geo {
    let Some(ip) = ip else {
        return Geo::default();
    };
    let Ok(parsed) = IpAddr::from_str(ip.trim()) else {
        tracing::debug!(ip, "unparseable visitor ip, skipping geo enrichment");
        return Geo::default();
    };
    if is_private_or_loopback(&parsed) {
        return Geo::default();
    }
    for block in GEO_TABLE {
        if ip.starts_with(block.prefix) {
            return Geo {
                country: Some(block.country.to_string()),
                region: Some(block.region.to_string()),
                city: Some(block.city.to_string()),
            };
        }
    }
    Geo::default()
}

fn is_private_or_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

static MOBILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)mobile|iphone|android.*mobile").unwrap());
static TABLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ipad|tablet|(android(?!.*mobile))").unwrap());

static BROWSER_RES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"(?i)edg/").unwrap(), "Edge"),
        (Regex::new(r"(?i)opr/|opera").unwrap(), "Opera"),
        (Regex::new(r"(?i)chrome/").unwrap(), "Chrome"),
        (Regex::new(r"(?i)crios/").unwrap(), "Chrome"),
        (Regex::new(r"(?i)fxios/|firefox/").unwrap(), "Firefox"),
        (Regex::new(r"(?i)version/.*safari/").unwrap(), "Safari"),
    ]
});

static OS_RES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"(?i)windows nt").unwrap(), "Windows"),
        (Regex::new(r"(?i)mac os x|macintosh").unwrap(), "macOS"),
        (Regex::new(r"(?i)android").unwrap(), "Android"),
        (Regex::new(r"(?i)iphone os|ipad|cpu os").unwrap(), "iOS"),
        (Regex::new(r"(?i)linux").unwrap(), "Linux"),
    ]
});

/// Parses a user-agent string into device attributes. `deviceType`
/// defaults to `desktop` whenever neither mobile nor tablet signals
/// match, per §4.2.
pub fn device_of(ua: Option<&str>) -> Device {
    let Some(ua) = ua else {
        return Device::default();
    };
    if ua.trim().is_empty() {
        return Device::default();
    }

    let device_type = if MOBILE_RE.is_match(ua) {
        DeviceType::Mobile
    } else if TABLET_RE.is_match(ua) {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    };

    let browser = BROWSER_RES
        .iter()
        .find(|(re, _)| re.is_match(ua))
        .map(|(_, name)| name.to_string());
    let os = OS_RES
        .iter()
        .find(|(re, _)| re.is_match(ua))
        .map(|(_, name)| name.to_string());

    Device { device_type, browser, os }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_miss_is_empty() {
        assert_eq!(geo_of(Some("10.0.0.1")), Geo::default());
        assert_eq!(geo_of(Some("not-an-ip")), Geo::default());
        assert_eq!(geo_of(None), Geo::default());
    }

    #[test]
    fn geo_hit_is_idempotent() {
        let once = geo_of(Some("8.8.8.8"));
        let twice = geo_of(Some("8.8.8.8"));
        assert_eq!(once, twice);
        assert_eq!(once.country.as_deref(), Some("US"));
    }

    #[test]
    fn device_defaults_to_desktop() {
        let d = device_of(None);
        assert_eq!(d.device_type, DeviceType::Desktop);
        assert!(d.browser.is_none());
    }

    #[test]
    fn device_detects_mobile_chrome() {
        let ua = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0 Mobile Safari/537.36";
        let d = device_of(Some(ua));
        assert_eq!(d.device_type, DeviceType::Mobile);
        assert_eq!(d.browser.as_deref(), Some("Chrome"));
        assert_eq!(d.os.as_deref(), Some("Android"));
    }

    #[test]
    fn device_detects_desktop_safari() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15";
        let d = device_of(Some(ua));
        assert_eq!(d.device_type, DeviceType::Desktop);
        assert_eq!(d.browser.as_deref(), Some("Safari"));
        assert_eq!(d.os.as_deref(), Some("macOS"));
    }

    #[test]
    fn device_parse_is_idempotent() {
        let ua = "Mozilla/5.0 (iPad; CPU OS 16_5 like Mac OS X) AppleWebKit/605.1.15";
        assert_eq!(device_of(Some(ua)), device_of(Some(ua)));
    }
}
