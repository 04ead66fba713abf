//! Geolocation provider pool
//!
//! Providers are tried round-robin with per-minute rate limiting. Response
//! parsing is declarative: a fixed list of country-code and country-name
//! keys is probed against the raw JSON, so adding a provider is a table
//! entry, not a parser.

use serde_json::Value;

/// Provider availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Ready,
    /// Hit the per-minute ceiling; reset when the window rolls over
    Limited,
    /// Requires an API key that is not configured
    NoKey,
    Failed,
}

/// One geolocation HTTP provider
#[derive(Debug, Clone)]
pub struct GeoProvider {
    pub name: String,
    /// `{ip}` and `{key}` are substituted
    pub url_template: String,
    pub requires_key: bool,
    pub api_key: Option<String>,
    pub rate_limit_per_minute: u32,
    pub status: ProviderStatus,
    pub calls_in_window: u32,
    /// Epoch seconds of the current window start
    pub window_start: i64,
}

impl GeoProvider {
    pub fn new(name: &str, url_template: &str, rate_limit_per_minute: u32) -> Self {
        GeoProvider {
            name: name.to_string(),
            url_template: url_template.to_string(),
            requires_key: false,
            api_key: None,
            rate_limit_per_minute,
            status: ProviderStatus::Ready,
            calls_in_window: 0,
            window_start: 0,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.requires_key = true;
        self.status = if key.is_some() {
            ProviderStatus::Ready
        } else {
            ProviderStatus::NoKey
        };
        self.api_key = key;
        self
    }

    /// Build the request URL for an address
    pub fn url_for(&self, ip: &str) -> String {
        let mut url = self.url_template.replace("{ip}", ip);
        if let Some(key) = &self.api_key {
            url = url.replace("{key}", key);
        }
        url
    }

    /// Reset the minute window if it has elapsed; un-limit the provider
    pub fn roll_window(&mut self, now_epoch: i64) {
        if now_epoch - self.window_start >= 60 {
            self.window_start = now_epoch;
            self.calls_in_window = 0;
            if self.status == ProviderStatus::Limited {
                self.status = ProviderStatus::Ready;
            }
        }
    }

    /// Account one call; flips to limited at the ceiling
    pub fn record_call(&mut self) {
        self.calls_in_window += 1;
        if self.rate_limit_per_minute > 0 && self.calls_in_window >= self.rate_limit_per_minute {
            self.status = ProviderStatus::Limited;
        }
    }
}

/// The built-in provider pool, cheapest and most permissive first
pub fn default_providers() -> Vec<GeoProvider> {
    vec![
        GeoProvider::new("ip-api.com", "http://ip-api.com/json/{ip}", 40),
        GeoProvider::new("ipwho.is", "https://ipwho.is/{ip}", 30),
        GeoProvider::new("freeipapi.com", "https://freeipapi.com/api/json/{ip}", 50),
        GeoProvider::new("ipapi.co", "https://ipapi.co/{ip}/json/", 25),
    ]
}

const COUNTRY_CODE_KEYS: &[&str] = &["country_code", "countryCode", "country", "country_code2"];
const COUNTRY_NAME_KEYS: &[&str] = &["country_name", "countryName", "country"];
const CITY_KEYS: &[&str] = &["city", "cityName", "city_name"];
const ORG_KEYS: &[&str] = &["org", "isp", "as"];

/// Fields canonicalised out of a provider response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGeo {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city: Option<String>,
    pub org: Option<String>,
}

fn looks_like_country_code(value: &str) -> bool {
    value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic())
}

/// Probe the known keys against a raw provider response
pub fn parse_response(json: &Value) -> ParsedGeo {
    let str_at = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|key| json.get(*key))
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    };

    let country_code = COUNTRY_CODE_KEYS
        .iter()
        .filter_map(|key| json.get(*key))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|v| looks_like_country_code(v))
        .map(|v| v.to_uppercase());

    ParsedGeo {
        country_code,
        country_name: str_at(COUNTRY_NAME_KEYS),
        city: str_at(CITY_KEYS),
        org: str_at(ORG_KEYS),
    }
}

/// Whether a response body carries a textual rate-limit signal
pub fn is_rate_limit_signal(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("rate limit")
        || lowered.contains("too many requests")
        || lowered.contains("quota")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ip_api_shape() {
        // ip-api.com: `country` is a name, `countryCode` is the code
        let body = json!({
            "status": "success",
            "country": "United States",
            "countryCode": "US",
            "city": "Ashburn",
            "org": "Google LLC"
        });
        let parsed = parse_response(&body);
        assert_eq!(parsed.country_code.as_deref(), Some("US"));
        assert_eq!(parsed.country_name.as_deref(), Some("United States"));
        assert_eq!(parsed.city.as_deref(), Some("Ashburn"));
        assert_eq!(parsed.org.as_deref(), Some("Google LLC"));
    }

    #[test]
    fn test_parse_snake_case_shape() {
        let body = json!({"country_code": "hk", "country_name": "Hong Kong"});
        let parsed = parse_response(&body);
        assert_eq!(parsed.country_code.as_deref(), Some("HK"));
        assert_eq!(parsed.country_name.as_deref(), Some("Hong Kong"));
    }

    #[test]
    fn test_parse_country_key_as_code() {
        // Some providers put the bare code under `country`
        let body = json!({"country": "JP"});
        let parsed = parse_response(&body);
        assert_eq!(parsed.country_code.as_deref(), Some("JP"));
    }

    #[test]
    fn test_parse_empty_falls_back_to_none() {
        let parsed = parse_response(&json!({"status": "fail"}));
        assert_eq!(parsed.country_code, None);
        assert_eq!(parsed.country_name, None);
    }

    #[test]
    fn test_url_for_substitution() {
        let provider = GeoProvider::new("x", "https://x.example/{ip}?key={key}", 10)
            .with_key(Some("secret".to_string()));
        assert_eq!(provider.url_for("1.2.3.4"), "https://x.example/1.2.3.4?key=secret");
    }

    #[test]
    fn test_no_key_status() {
        let provider = GeoProvider::new("x", "https://x.example/{ip}", 10).with_key(None);
        assert_eq!(provider.status, ProviderStatus::NoKey);
    }

    #[test]
    fn test_window_roll_and_limit() {
        let mut provider = GeoProvider::new("x", "u", 2);
        provider.roll_window(1000);
        provider.record_call();
        assert_eq!(provider.status, ProviderStatus::Ready);
        provider.record_call();
        assert_eq!(provider.status, ProviderStatus::Limited);
        // Within the same window the limit holds
        provider.roll_window(1030);
        assert_eq!(provider.status, ProviderStatus::Limited);
        // A new window resets it
        provider.roll_window(1061);
        assert_eq!(provider.status, ProviderStatus::Ready);
        assert_eq!(provider.calls_in_window, 0);
    }

    #[test]
    fn test_rate_limit_signal() {
        assert!(is_rate_limit_signal("Rate limit exceeded"));
        assert!(is_rate_limit_signal("{\"message\": \"quota reached\"}"));
        assert!(!is_rate_limit_signal("{\"countryCode\": \"US\"}"));
    }
}
