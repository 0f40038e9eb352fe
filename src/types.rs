use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a fresh session identifier as a canonical UUID string.
///
/// Session ids chosen client-side are passed through untouched; this is only
/// used when `sessionId` is absent on `trackView`/`trackClick`.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Geographic attributes derived from a visitor IP. All fields empty on a
/// miss or null input -- see `enrich::geo_of`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Geo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// `deviceType` always has a value; mobile/tablet/desktop, defaulting to
/// desktop. Browser/os are best-effort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub device_type: DeviceType,
    pub browser: Option<String>,
    pub os: Option<String>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Desktop,
            browser: None,
            os: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeviceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(DeviceType::Mobile),
            "tablet" => Ok(DeviceType::Tablet),
            _ => Ok(DeviceType::Desktop),
        }
    }
}

/// Query-time granularity for `timeSeriesData` bucketing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

/// Coarse preset understood by the `?period=` query param on the summary
/// routes (`7d`, `30d`, `90d`, `1y`), distinct from the `Period` bucketing
/// granularity used in `timeSeriesData`.
#[derive(Debug, Clone, Copy)]
pub enum PeriodPreset {
    SevenDays,
    ThirtyDays,
    NinetyDays,
    OneYear,
}

impl PeriodPreset {
    pub fn days(self) -> i64 {
        match self {
            PeriodPreset::SevenDays => 7,
            PeriodPreset::ThirtyDays => 30,
            PeriodPreset::NinetyDays => 90,
            PeriodPreset::OneYear => 365,
        }
    }
}

impl std::str::FromStr for PeriodPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(PeriodPreset::SevenDays),
            "30d" => Ok(PeriodPreset::ThirtyDays),
            "90d" => Ok(PeriodPreset::NinetyDays),
            "1y" => Ok(PeriodPreset::OneYear),
            other => Err(format!("unknown period preset: {other}")),
        }
    }
}

/// Inclusive-exclusive UTC time range used throughout Query and Aggregator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn from_preset(preset: PeriodPreset, now: DateTime<Utc>) -> Self {
        Self {
            start: now - chrono::Duration::days(preset.days()),
            end: now,
        }
    }

    /// Ranges ending at or before midnight UTC today are eligible for the
    /// rollup shortcut (see Query §4.4 point 3).
    pub fn ends_before_today(&self, today_start: DateTime<Utc>) -> bool {
        self.end <= today_start
    }
}

/// Truncates a timestamp to midnight UTC -- the canonical `date` bucketing
/// rule used by every rollup table.
pub fn date_bucket(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap().and_utc()
}

/// Generic API envelope mirroring the teacher's `ApiResponse<T>` wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Classification bucket for `ReferrerStats.referrerType` / Query's
/// `referrerData`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReferrerType {
    Search,
    Social,
    Direct,
    Other,
}

impl std::fmt::Display for ReferrerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReferrerType::Search => "search",
            ReferrerType::Social => "social",
            ReferrerType::Direct => "direct",
            ReferrerType::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Classifies a raw referrer string per §4.3 point 5.
pub fn classify_referrer(referrer: &str) -> ReferrerType {
    let lower = referrer.to_lowercase();
    if lower.is_empty() || lower == "direct" {
        return ReferrerType::Direct;
    }
    const SEARCH: [&str; 3] = ["google", "bing", "yahoo"];
    const SOCIAL: [&str; 4] = ["facebook", "twitter", "instagram", "linkedin"];
    if SEARCH.iter().any(|s| lower.contains(s)) {
        ReferrerType::Search
    } else if SOCIAL.iter().any(|s| lower.contains(s)) {
        ReferrerType::Social
    } else {
        ReferrerType::Other
    }
}

/// Reduces a referrer URL to a bare hostname for presentation, falling back
/// to the raw string when it doesn't parse as a URL (see §9 Open Question:
/// storage keeps the full string, presentation shows the hostname).
pub fn referrer_hostname(referrer: &str) -> String {
    if referrer.is_empty() {
        return referrer.to_string();
    }
    let candidate = if referrer.contains("://") {
        referrer.to_string()
    } else {
        format!("https://{referrer}")
    };
    match url::Url::parse(&candidate) {
        Ok(url) => url.host_str().unwrap_or(referrer).to_string(),
        Err(_) => referrer.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_search_engines() {
        assert_eq!(
            classify_referrer("https://www.google.com/search?q=x"),
            ReferrerType::Search
        );
        assert_eq!(classify_referrer("https://bing.com"), ReferrerType::Search);
    }

    #[test]
    fn classifies_social() {
        assert_eq!(
            classify_referrer("https://t.co/facebook-share"),
            ReferrerType::Social
        );
    }

    #[test]
    fn classifies_direct() {
        assert_eq!(classify_referrer(""), ReferrerType::Direct);
        assert_eq!(classify_referrer("direct"), ReferrerType::Direct);
    }

    #[test]
    fn classifies_other() {
        assert_eq!(
            classify_referrer("https://news.ycombinator.com"),
            ReferrerType::Other
        );
    }

    #[test]
    fn hostname_reduction() {
        assert_eq!(
            referrer_hostname("https://www.google.com/search?q=x"),
            "www.google.com"
        );
        assert_eq!(referrer_hostname(""), "");
    }

    #[test]
    fn session_id_is_canonical_uuid() {
        let id = generate_session_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
