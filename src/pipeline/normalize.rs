// src/pipeline/normalize.rs

//! Raw scraped records to canonical auctions.
//!
//! Sources disagree on key names, date formats and price notation. The
//! normalizer accepts the common variants and rejects a record only when a
//! required field (title, end date, url) cannot be recovered.

use std::collections::{BTreeMap, HashSet};

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::geo::zip_key;
use crate::models::{
    AuctionStatus, DetailInput, ImageInput, LocationInput, NormalizedAuction, RawRecord,
    RawValue, SourceInfo,
};
use crate::utils::url::resolve;

const TITLE_KEYS: &[&str] = &["title", "name"];
const URL_KEYS: &[&str] = &["url", "link", "detail_url"];
const END_KEYS: &[&str] = &["end_date", "end_time", "close_date", "closing_date", "ends_at"];
const TIME_LEFT_KEYS: &[&str] = &["time_left"];
const START_KEYS: &[&str] = &["start_date", "start_time"];
const ID_KEYS: &[&str] = &["external_id", "auction_id", "id", "lot_id"];
const PRICE_KEYS: &[&str] = &["current_price", "current_bid", "price"];
const STARTING_PRICE_KEYS: &[&str] = &["starting_price", "starting_bid", "opening_bid"];
const DESCRIPTION_KEYS: &[&str] = &["description", "summary"];
const ADDRESS_KEYS: &[&str] = &["address"];
const CITY_KEYS: &[&str] = &["city"];
const STATE_KEYS: &[&str] = &["state"];
const ZIP_KEYS: &[&str] = &["zip_code", "zip"];
const LOCATION_KEYS: &[&str] = &["location"];
const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "lon", "lng"];
const CATEGORY_KEYS: &[&str] = &["category"];
const IMAGE_KEYS: &[&str] = &["images", "image_url", "image"];
const STATUS_KEYS: &[&str] = &["status"];
// Source identity is carried by `SourceInfo`, never by the record.
const IGNORED_KEYS: &[&str] = &["source", "source_id"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%y %I:%M %p",
    "%b %d, %Y %I:%M:%S %p",
    "%b %d, %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %H:%M",
    "%B %d, %Y %H:%M",
    "%b %d %Y %I:%M %p",
    "%d %b %Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M%:z",
];

/// Category keyword lists, checked in order; the first hit wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "vehicles",
        &[
            "car", "truck", "van", "suv", "pickup", "sedan", "vehicle", "auto", "automobile",
            "motorcycle", "trailer", "ford", "chevy", "chevrolet", "dodge", "toyota", "honda",
            "nissan",
        ],
    ),
    (
        "real_estate",
        &[
            "property", "land", "house", "home", "apartment", "condo", "acre", "acreage",
            "building",
        ],
    ),
    (
        "jewelry",
        &[
            "jewelry", "jewellery", "watch", "rolex", "gold", "silver", "diamond", "necklace",
            "bracelet", "ring",
        ],
    ),
    (
        "equipment",
        &[
            "equipment", "machinery", "tool", "forklift", "tractor", "generator", "mower",
            "excavator", "backhoe", "loader", "compressor",
        ],
    ),
    (
        "electronics",
        &[
            "computer", "laptop", "phone", "electronic", "electronics", "tv", "television",
            "monitor", "printer", "tablet", "camera", "server",
        ],
    ),
    (
        "furniture",
        &[
            "furniture", "desk", "chair", "table", "cabinet", "sofa", "couch", "bookcase",
            "shelving", "dresser",
        ],
    ),
];

/// A zone suffix found on a date string.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Zone {
    /// Explicit offset (`CST`, `EDT`, `UTC`, ...)
    Fixed(i32),
    /// US zone without a daylight marker (`CT`); standard offset in hours
    UsLocal(i32),
}

impl Zone {
    fn from_abbreviation(abbr: &str) -> Option<Self> {
        Some(match abbr {
            "UTC" | "GMT" | "Z" => Zone::Fixed(0),
            "EST" => Zone::Fixed(-5),
            "EDT" => Zone::Fixed(-4),
            "CST" => Zone::Fixed(-6),
            "CDT" => Zone::Fixed(-5),
            "MST" => Zone::Fixed(-7),
            "MDT" => Zone::Fixed(-6),
            "PST" => Zone::Fixed(-8),
            "PDT" => Zone::Fixed(-7),
            "ET" => Zone::UsLocal(-5),
            "CT" => Zone::UsLocal(-6),
            "MT" => Zone::UsLocal(-7),
            "PT" => Zone::UsLocal(-8),
            _ => return None,
        })
    }

    fn offset_for(&self, local: NaiveDateTime) -> Option<FixedOffset> {
        let hours = match *self {
            Zone::Fixed(hours) => hours,
            Zone::UsLocal(standard) if us_daylight_saving(local) => standard + 1,
            Zone::UsLocal(standard) => standard,
        };
        FixedOffset::east_opt(hours * 3600)
    }
}

/// US daylight saving: second Sunday of March 02:00 to first Sunday of
/// November 02:00, local time.
fn us_daylight_saving(local: NaiveDateTime) -> bool {
    let year = local.year();
    let start = NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)
        .and_then(|d| d.and_hms_opt(2, 0, 0));
    let end = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)
        .and_then(|d| d.and_hms_opt(2, 0, 0));
    match (start, end) {
        (Some(start), Some(end)) => local >= start && local < end,
        _ => false,
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Converts [`RawRecord`]s into [`NormalizedAuction`]s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    default_offset: FixedOffset,
    label: Regex,
    lead_verb: Regex,
    weekday: Regex,
    meridiem: Regex,
    zone: Regex,
    time_left: Regex,
    number: Regex,
    city_state: Regex,
    zip: Regex,
}

impl Normalizer {
    /// Create a normalizer. Times without a zone are read at
    /// `utc_offset_hours` from UTC.
    pub fn new(utc_offset_hours: i32) -> Result<Self> {
        let default_offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            AppError::config(format!("invalid source UTC offset {utc_offset_hours}h"))
        })?;
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AppError::config(format!("bad pattern: {e}")))
        };

        Ok(Self {
            default_offset,
            label: compile(r"^[A-Za-z][A-Za-z ]{0,30}:\s*")?,
            lead_verb: compile(r"^(?i)(?:ends?|ending|closes?|closing|starts?|starting)(?:\s+(?:on|at))?\s+")?,
            weekday: compile(r"^(?i)(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+")?,
            meridiem: compile(r"(?i)(\d)\s*([ap])\.?m\.?(?:\s|$)")?,
            zone: compile(r"^(.*?)\s*\b(UTC|GMT|EST|EDT|CST|CDT|MST|MDT|PST|PDT|ET|CT|MT|PT)\.?$")?,
            time_left: compile(
                r"(?i)(\d+)\s*(days?|d|hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b",
            )?,
            number: compile(r"-?\d+(?:\.\d+)?")?,
            city_state: compile(
                r"((?:[A-Z][A-Za-z.'-]*\s+){0,2}[A-Z][A-Za-z.'-]*)\s*,\s*(TX|Texas|[A-Z]{2})\b(?:\s+(\d{5})(?:-\d{4})?)?",
            )?,
            zip: compile(r"\b(\d{5})(?:-\d{4})?\b")?,
        })
    }

    /// Normalize one raw record scraped from `source`.
    pub fn normalize(
        &self,
        source: &SourceInfo,
        raw: &RawRecord,
        now: DateTime<Utc>,
    ) -> Result<NormalizedAuction> {
        if source.key.trim().is_empty() || source.name.trim().is_empty() {
            return Err(AppError::normalization("source", "source identity is missing"));
        }

        let record = Record::new(raw);

        let title = record
            .text(TITLE_KEYS)
            .map(|t| clean_text(&t))
            .ok_or_else(|| AppError::normalization("title", "missing"))?;
        let url = record
            .text(URL_KEYS)
            .map(|u| resolve(&source.website_url, &u))
            .ok_or_else(|| AppError::normalization("url", "missing"))?;
        let end_date = self.end_date(&record, now)?;

        let start_date = record.text(START_KEYS).and_then(|text| {
            let parsed = self.parse_datetime(&text);
            if parsed.is_none() {
                log::warn!("Ignoring unparseable start date '{}' for '{}'", text, title);
            }
            parsed
        });

        let description = record
            .text(DESCRIPTION_KEYS)
            .map(|d| clean_text(&d))
            .filter(|d| !d.is_empty());

        let category_path = match record.text(CATEGORY_KEYS) {
            Some(text) => category_path(&text),
            None => Vec::new(),
        };
        let category_path = if category_path.is_empty() {
            vec![categorize(&title, description.as_deref().unwrap_or_default()).to_string()]
        } else {
            category_path
        };

        let mut status = record
            .text(STATUS_KEYS)
            .and_then(|s| s.parse::<AuctionStatus>().ok())
            .unwrap_or(AuctionStatus::Active);
        if status == AuctionStatus::Active && end_date <= now {
            status = AuctionStatus::Ended;
        }

        Ok(NormalizedAuction {
            external_id: record.text(ID_KEYS),
            current_price: self.price(&record, PRICE_KEYS, &title),
            starting_price: self.price(&record, STARTING_PRICE_KEYS, &title),
            location: self.location(&record),
            images: images(&record, &url),
            details: record.details(),
            title,
            description,
            start_date,
            end_date,
            category_path,
            url,
            status,
        })
    }

    fn end_date(&self, record: &Record<'_>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let end_text = record.text(END_KEYS);
        if let Some(parsed) = end_text.as_deref().and_then(|t| self.parse_datetime(t)) {
            return Ok(parsed);
        }
        if let Some(parsed) = record
            .text(TIME_LEFT_KEYS)
            .and_then(|t| self.parse_time_left(&t, now))
        {
            return Ok(parsed);
        }
        Err(match (end_text, record.text(TIME_LEFT_KEYS)) {
            (Some(text), _) | (None, Some(text)) => {
                AppError::normalization("end_date", format!("could not parse '{text}'"))
            }
            (None, None) => AppError::normalization("end_date", "missing"),
        })
    }

    /// Parse an absolute date/time in any supported notation into UTC.
    ///
    /// Date-only values mean midnight of that day.
    pub fn parse_datetime(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = clean_text(text);
        let text = self.label.replace(&text, "");
        let text = self.lead_verb.replace(&text, "");
        let text = self.weekday.replace(&text, "");
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if text.chars().all(|c| c.is_ascii_digit()) {
            let value: i64 = text.parse().ok()?;
            return match text.len() {
                10 => DateTime::from_timestamp(value, 0),
                13 => DateTime::from_timestamp_millis(value),
                _ => None,
            };
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Some(parsed.with_timezone(&Utc));
        }
        for format in OFFSET_FORMATS {
            if let Ok(parsed) = DateTime::parse_from_str(text, format) {
                return Some(parsed.with_timezone(&Utc));
            }
        }

        let (body, zone) = match self.zone.captures(text) {
            Some(caps) => (
                caps.get(1).map_or("", |m| m.as_str()).to_string(),
                caps.get(2).and_then(|m| Zone::from_abbreviation(m.as_str())),
            ),
            None => (text.to_string(), None),
        };

        let body = body.replace(" at ", " ").replace("Sept ", "Sep ");
        let body = self.meridiem.replace_all(&body, |caps: &regex::Captures<'_>| {
            format!("{} {}M ", &caps[1], caps[2].to_uppercase())
        });
        let local = parse_naive(body.trim().trim_end_matches(','))?;

        let offset = match zone {
            Some(zone) => zone.offset_for(local)?,
            None => self.default_offset,
        };
        offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Parse a countdown such as `3 days 15 hours` relative to `now`.
    pub fn parse_time_left(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut total = Duration::zero();
        let mut matched = false;

        for caps in self.time_left.captures_iter(text) {
            let amount: i64 = caps[1].parse().ok()?;
            let unit = caps[2].to_ascii_lowercase();
            let step = match unit.chars().next()? {
                'd' => Duration::try_days(amount),
                'h' => Duration::try_hours(amount),
                'm' => Duration::try_minutes(amount),
                _ => Duration::try_seconds(amount),
            }?;
            total = total.checked_add(&step)?;
            matched = true;
        }

        if !matched {
            return None;
        }
        now.checked_add_signed(total)
    }

    /// Parse a price such as `$1,234.56` or `USD 40`. Negative values are rejected.
    pub fn parse_price(&self, text: &str) -> Option<f64> {
        let cleaned: String = text
            .replace("USD", "")
            .replace("usd", "")
            .chars()
            .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
            .collect();
        let value: f64 = self.number.find(&cleaned)?.as_str().parse().ok()?;
        (value.is_finite() && value >= 0.0).then_some(value)
    }

    fn price(&self, record: &Record<'_>, keys: &[&str], title: &str) -> Option<f64> {
        let (key, value) = record.value(keys)?;
        let parsed = match value {
            RawValue::Number(n) if n.is_finite() && *n >= 0.0 => Some(*n),
            RawValue::Number(_) => None,
            RawValue::Text(text) => self.parse_price(text),
            RawValue::Null => return None,
        };
        if parsed.is_none() {
            log::warn!(
                "Dropping invalid {} {:?} for '{}'",
                key,
                value.as_text().unwrap_or_default(),
                title
            );
        }
        parsed
    }

    /// Extract `City, ST 12345` (ZIP optional) from free text, falling back
    /// to a bare ZIP code.
    pub fn parse_location(&self, text: &str) -> Option<LocationInput> {
        let text = clean_text(text);

        if let Some(caps) = self.city_state.captures(&text) {
            let whole = caps.get(0)?;
            let address = text[..whole.start()]
                .trim()
                .trim_end_matches(',')
                .trim()
                .to_string();
            return Some(LocationInput {
                address: (!address.is_empty()).then_some(address),
                city: caps.get(1).map(|m| m.as_str().trim().to_string()),
                state: normalize_state(&caps[2]),
                zip_code: caps.get(3).map(|m| m.as_str().to_string()),
                latitude: None,
                longitude: None,
            });
        }

        let caps = self.zip.captures(&text)?;
        Some(LocationInput {
            zip_code: Some(caps[1].to_string()),
            state: "TX".to_string(),
            ..LocationInput::default()
        })
    }

    fn location(&self, record: &Record<'_>) -> Option<LocationInput> {
        let address = record.text(ADDRESS_KEYS).map(|a| clean_text(&a));
        let city = record.text(CITY_KEYS).map(|c| clean_text(&c));
        let zip_code = record.text(ZIP_KEYS).and_then(|z| zip_key(&z).ok());
        let state = record.text(STATE_KEYS).map(|s| normalize_state(&s));

        let mut location = if address.is_some() || city.is_some() || zip_code.is_some() {
            LocationInput {
                address,
                city,
                state: state.clone().unwrap_or_else(|| "TX".to_string()),
                zip_code,
                latitude: None,
                longitude: None,
            }
        } else if let Some(parsed) = record
            .text(LOCATION_KEYS)
            .and_then(|text| self.parse_location(&text))
        {
            parsed
        } else {
            LocationInput {
                state: "TX".to_string(),
                ..LocationInput::default()
            }
        };

        if let Some(state) = state {
            location.state = state;
        }

        let latitude = record.number(LATITUDE_KEYS);
        let longitude = record.number(LONGITUDE_KEYS);
        if let (Some(lat), Some(lon)) = (latitude, longitude) {
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
                location.latitude = Some(lat);
                location.longitude = Some(lon);
            }
        }

        (location.is_meaningful() || location.has_coordinates()).then_some(location)
    }
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

fn normalize_state(state: &str) -> String {
    let state = state.trim();
    if state.eq_ignore_ascii_case("texas") {
        "TX".to_string()
    } else {
        state.to_ascii_uppercase()
    }
}

/// Split an explicit `Parent > Child` category into its chain.
fn category_path(text: &str) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();
    for part in text.split('>').map(clean_text).filter(|p| !p.is_empty()) {
        if path.last() != Some(&part) {
            path.push(part);
        }
    }
    path
}

/// Keyword heuristic over title and description.
pub fn categorize(title: &str, description: &str) -> &'static str {
    let text = format!("{title} {description}").to_lowercase();
    let words: HashSet<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |keyword: &str| {
        words.contains(keyword) || words.contains(format!("{keyword}s").as_str())
    };

    if text.contains("real estate") {
        return "real_estate";
    }
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| has(*k)))
        .map(|(name, _)| *name)
        .unwrap_or("other")
}

/// Image URLs from whitespace, `|` or `,` separated fields, deduplicated.
/// The first image is primary.
fn images(record: &Record<'_>, page_url: &str) -> Vec<ImageInput> {
    let mut seen = HashSet::new();
    let mut out: Vec<ImageInput> = Vec::new();

    for key in IMAGE_KEYS {
        let Some(text) = record.text(&[*key]) else {
            continue;
        };
        for part in text.split(|c: char| c.is_whitespace() || c == '|' || c == ',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let url = resolve(page_url, part);
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                continue;
            }
            if seen.insert(url.clone()) {
                out.push(ImageInput {
                    is_primary: out.is_empty(),
                    url,
                });
            }
        }
    }
    out
}

/// Case-insensitive view over a raw record.
struct Record<'a> {
    fields: BTreeMap<String, &'a RawValue>,
}

impl<'a> Record<'a> {
    fn new(raw: &'a RawRecord) -> Self {
        Self {
            fields: raw
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect(),
        }
    }

    /// First non-null value among `keys`, with the key it came from.
    fn value(&self, keys: &[&str]) -> Option<(&str, &'a RawValue)> {
        keys.iter().find_map(|key| {
            self.fields
                .get_key_value(*key)
                .filter(|(_, v)| v.as_text().is_some())
                .map(|(k, v)| (k.as_str(), *v))
        })
    }

    fn text(&self, keys: &[&str]) -> Option<String> {
        self.value(keys).and_then(|(_, v)| v.as_text())
    }

    fn number(&self, keys: &[&str]) -> Option<f64> {
        match self.value(keys)?.1 {
            RawValue::Number(n) => Some(*n),
            RawValue::Text(text) => text.trim().parse().ok(),
            RawValue::Null => None,
        }
    }

    /// Every non-null field not consumed by a known alias.
    fn details(&self) -> Vec<DetailInput> {
        let known: HashSet<&str> = [
            TITLE_KEYS,
            URL_KEYS,
            END_KEYS,
            TIME_LEFT_KEYS,
            START_KEYS,
            ID_KEYS,
            PRICE_KEYS,
            STARTING_PRICE_KEYS,
            DESCRIPTION_KEYS,
            ADDRESS_KEYS,
            CITY_KEYS,
            STATE_KEYS,
            ZIP_KEYS,
            LOCATION_KEYS,
            LATITUDE_KEYS,
            LONGITUDE_KEYS,
            CATEGORY_KEYS,
            IMAGE_KEYS,
            STATUS_KEYS,
            IGNORED_KEYS,
        ]
        .concat()
        .into_iter()
        .collect();

        self.fields
            .iter()
            .filter(|(key, _)| !key.is_empty() && !known.contains(key.as_str()))
            .filter_map(|(key, value)| {
                value.as_text().map(|value| DetailInput {
                    key: key.clone(),
                    value,
                })
            })
            .collect()
    }
}
