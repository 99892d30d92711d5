use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub type Price = f64;

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub display_name: String,
    pub source_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity {
    pub fn new(display_name: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            source_key: source_key.into(),
            ..Default::default()
        }
    }

    pub fn with_coords(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    pub fn with_image_url(mut self, value: impl Into<String>) -> Self {
        self.image_url = Some(value.into());
        self
    }

    pub fn coords(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }
}

/// One upstream daily record, before a single price is picked out of it.
#[derive(Default, Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub adj_close: Option<Price>,
    pub volume: u64,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    #[default]
    #[display(fmt = "adj_close")]
    AdjClose,
    #[display(fmt = "close")]
    Close,
}

impl PriceField {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "adj_close" | "adjclose" | "adj close" => Some(PriceField::AdjClose),
            "close" => Some(PriceField::Close),
            _ => None,
        }
    }

    /// The field actually read for a whole run of bars. Adjusted close is
    /// only used when at least one bar carries it.
    pub fn resolve<'a>(&self, mut bars: impl Iterator<Item = &'a PriceBar>) -> PriceField {
        match self {
            PriceField::AdjClose if bars.any(|bar| bar.adj_close.is_some()) => {
                PriceField::AdjClose
            }
            _ => PriceField::Close,
        }
    }

    /// `None` when the bar lacks the field.
    pub fn pick(&self, bar: &PriceBar) -> Option<Price> {
        match self {
            PriceField::AdjClose => bar.adj_close,
            PriceField::Close => Some(bar.close),
        }
    }
}

/// Half-open calendar range `[start, end)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(fmt = "{}..{}", start, end)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Saturates at the earliest representable date.
    pub fn trailing_days(end: NaiveDate, days: u32) -> Self {
        Self {
            start: end
                .checked_sub_days(Days::new(days as u64))
                .unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    pub fn contains(&self, date: &NaiveDate) -> bool {
        *date >= self.start && *date < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub source_key: String,
    pub points: BTreeMap<NaiveDate, Price>,
}

impl Series {
    pub fn new(source_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            points: BTreeMap::new(),
        }
    }

    pub fn from_points(
        source_key: impl Into<String>,
        points: impl IntoIterator<Item = (NaiveDate, Price)>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            points: points.into_iter().collect(),
        }
    }

    pub fn from_bars(
        source_key: impl Into<String>,
        bars: &BTreeMap<NaiveDate, PriceBar>,
        field: PriceField,
    ) -> Self {
        // one field for the whole series; bars without it are holes
        let field = field.resolve(bars.values());
        Self::from_points(
            source_key,
            bars.iter()
                .filter_map(|(date, bar)| field.pick(bar).map(|price| (*date, price))),
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clip(mut self, range: &DateRange) -> Self {
        self.points.retain(|date, _| range.contains(date));
        self
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[display(fmt = "absolute")]
    Absolute,
    #[default]
    #[display(fmt = "normalized")]
    Normalized,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub names: Vec<String>,
    pub mode: DisplayMode,
}

impl Selection {
    pub fn new(names: Vec<String>, mode: DisplayMode) -> Self {
        Self { names, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
