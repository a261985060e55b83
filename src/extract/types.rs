use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Date format used by the FPDS query language
const FPDS_DATE_FORMAT: &str = "%Y/%m/%d";

/// Query parameters of a detail-page link (`viewLinkController.jsp?...`)
pub type DetailReference = BTreeMap<String, String>;

/// Flat field map extracted from a detail page
pub type DetailMap = BTreeMap<String, String>;

/// Inclusive range of estimated completion dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!("start date {} is after end date {}", start, end));
        }
        Ok(Self { start, end })
    }

    /// Parses two `YYYY/MM/DD` dates
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let parse = |value: &str| {
            NaiveDate::parse_from_str(value.trim(), FPDS_DATE_FORMAT)
                .map_err(|e| format!("invalid date '{}' (expected YYYY/MM/DD): {}", value, e))
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}]",
            self.start.format(FPDS_DATE_FORMAT),
            self.end.format(FPDS_DATE_FORMAT)
        )
    }
}

/// Everything that identifies one result set on the remote site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub date_range: DateRange,

    /// Extra `KEY:"value"` terms, keyed by FPDS index field name
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl SearchQuery {
    pub fn new(date_range: DateRange) -> Self {
        Self {
            date_range,
            filters: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Renders the `q` parameter of an ezsearch request
    ///
    /// ```
    /// use fpds_harvester::{DateRange, SearchQuery};
    ///
    /// let range = DateRange::parse("2026/02/01", "2026/02/28").unwrap();
    /// let query = SearchQuery::new(range).with_filter("UEI_NAME", "ACME");
    /// assert_eq!(
    ///     query.to_query_string(),
    ///     "ESTIMATED_COMPLETION_DATE:[2026/02/01,2026/02/28] UEI_NAME:\"ACME\""
    /// );
    /// ```
    pub fn to_query_string(&self) -> String {
        let mut query = format!("ESTIMATED_COMPLETION_DATE:{}", self.date_range);
        for (key, value) in &self.filters {
            query.push_str(&format!(" {}:\"{}\"", key, value));
        }
        query
    }
}

/// One summary record from a search result page
///
/// `page` and `position` tag the record with where it came from so the final
/// aggregate can be put back into page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub page: u64,
    pub position: usize,
    pub fields: BTreeMap<String, String>,
    pub detail_ref: Option<DetailReference>,
}

impl RawRecord {
    pub fn new(page: u64, position: usize) -> Self {
        Self {
            page,
            position,
            fields: BTreeMap::new(),
            detail_ref: None,
        }
    }
}

/// A finished record: summary fields plus the detail map, if one was fetched
///
/// The detail is attached when the record is built and cannot be changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    page: u64,
    position: usize,
    fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<DetailMap>,
}

impl ExtractedRecord {
    pub fn new(raw: RawRecord, detail: Option<DetailMap>) -> Self {
        Self {
            page: raw.page,
            position: raw.position,
            fields: raw.fields,
            detail,
        }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn detail(&self) -> Option<&DetailMap> {
        self.detail.as_ref()
    }

    /// Award identifier shown on the search page, if present
    pub fn award_key(&self) -> Option<&str> {
        ["award_id", "piid"]
            .iter()
            .find_map(|key| self.fields.get(*key))
            .map(String::as_str)
    }

    /// Sort key restoring page order across batches
    pub fn sort_key(&self) -> (u64, usize) {
        (self.page, self.position)
    }
}
