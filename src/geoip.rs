//! Geolocation enrichment
//!
//! Looks up the origin of an alert source over HTTP, with an in-process
//! cache and a short-circuit for private address space. Lookup failures
//! degrade to an `Unknown` record; they never fail an alert.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Enable remote lookups. Private-IP short-circuiting applies either way.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Lookup endpoint; the IP is appended as a path segment.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timeout_secs: default_timeout(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    5
}

fn default_endpoint() -> String {
    "http://ip-api.com/json".to_string()
}

/// Geolocation record attached to persisted alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    pub country_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub org: Option<String>,
}

impl GeoInfo {
    /// Record for private address space.
    pub fn private() -> Self {
        Self {
            country: "Private".to_string(),
            country_code: "XX".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            city: None,
            region: None,
            org: None,
        }
    }

    /// Record when no lookup is possible or the lookup failed.
    pub fn unknown() -> Self {
        Self {
            country: "Unknown".to_string(),
            country_code: "XX".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            city: None,
            region: None,
            org: None,
        }
    }
}

/// Whether the address never leaves the local network: RFC1918 IPv4 space
/// and loopback.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "countryCode")]
    country_code: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default, rename = "regionName")]
    region: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

/// Caching geolocation client.
pub struct GeoIpClient {
    config: GeoIpConfig,
    client: reqwest::Client,
    cache: Mutex<HashMap<IpAddr, GeoInfo>>,
}

impl GeoIpClient {
    pub fn new(config: GeoIpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("netwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve geolocation for `ip`. Never errors: failures come back as
    /// [`GeoInfo::unknown`].
    pub async fn lookup(&self, ip: IpAddr) -> GeoInfo {
        if is_private(ip) {
            return GeoInfo::private();
        }
        if let Some(hit) = self.cache.lock().get(&ip) {
            return hit.clone();
        }
        if !self.config.enabled {
            return GeoInfo::unknown();
        }

        match self.fetch(ip).await {
            Ok(info) => {
                self.cache.lock().insert(ip, info.clone());
                info
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "geolocation lookup failed");
                GeoInfo::unknown()
            }
        }
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoInfo> {
        let url = format!(
            "{}/{}?fields=status,message,country,countryCode,city,regionName,lat,lon,org",
            self.config.endpoint, ip
        );
        let response: ApiResponse = self.client.get(&url).send().await?.json().await?;
        if response.status != "success" {
            return Err(Error::Sink(format!("lookup status '{}'", response.status)));
        }
        Ok(GeoInfo {
            country: response.country.unwrap_or_else(|| "Unknown".to_string()),
            country_code: response.country_code.unwrap_or_else(|| "XX".to_string()),
            latitude: response.lat.unwrap_or(0.0),
            longitude: response.lon.unwrap_or(0.0),
            city: response.city,
            region: response.region,
            org: response.org,
        })
    }

    /// Cached entries, for diagnostics.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}
