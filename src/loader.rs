use std::{
    collections::BTreeMap,
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    config::BoardConfig,
    error::FetchError,
    model::{DateRange, Entity, Price, PriceBar, PriceField, Series},
};

pub trait Fetcher {
    fn fetch(&self, source_key: &str, range: &DateRange) -> Result<Series, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, source_key: &str, range: &DateRange) -> Result<Series, FetchError> {
        (**self).fetch(source_key, range)
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Loaded(Series),
    NoData { cause: FetchError },
}

impl FetchOutcome {
    pub fn series(&self) -> Option<&Series> {
        match self {
            FetchOutcome::Loaded(series) => Some(series),
            FetchOutcome::NoData { .. } => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, FetchOutcome::Loaded(_))
    }
}

#[derive(Debug)]
pub struct EntityFetch {
    pub display_name: String,
    pub source_key: String,
    pub outcome: FetchOutcome,
}

impl EntityFetch {
    pub fn warning(&self) -> Option<String> {
        match &self.outcome {
            FetchOutcome::Loaded(_) => None,
            FetchOutcome::NoData { cause } => Some(format!(
                "{} ({}): {cause}",
                self.display_name, self.source_key
            )),
        }
    }
}

/// Every failure below this point becomes `NoData`; nothing escapes.
pub fn fetch_outcome<F: Fetcher + ?Sized>(
    fetcher: &F,
    entity: &Entity,
    range: &DateRange,
) -> EntityFetch {
    let outcome = match fetcher.fetch(&entity.source_key, range) {
        Ok(series) if series.is_empty() => {
            warn!(key = %entity.source_key, "empty series");
            FetchOutcome::NoData {
                cause: FetchError::Empty,
            }
        }
        Ok(series) => {
            debug!(key = %entity.source_key, points = series.len(), "series loaded");
            FetchOutcome::Loaded(series)
        }
        Err(cause) => {
            warn!(key = %entity.source_key, %cause, "fetch failed");
            FetchOutcome::NoData { cause }
        }
    };

    EntityFetch {
        display_name: entity.display_name.clone(),
        source_key: entity.source_key.clone(),
        outcome,
    }
}

#[cfg(not(feature = "parallel"))]
pub fn fetch_all<F: Fetcher + ?Sized>(
    fetcher: &F,
    entities: &[&Entity],
    range: &DateRange,
) -> Vec<EntityFetch> {
    entities
        .iter()
        .map(|entity| fetch_outcome(fetcher, entity, range))
        .collect()
}

#[cfg(feature = "parallel")]
pub fn fetch_all<F: Fetcher + Sync + ?Sized>(
    fetcher: &F,
    entities: &[&Entity],
    range: &DateRange,
) -> Vec<EntityFetch> {
    use rayon::prelude::*;

    // par_iter keeps the input order on collect
    entities
        .par_iter()
        .map(|entity| fetch_outcome(fetcher, entity, range))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{what} attempt {}/{attempts} failed: {e}, retrying in {delay:?}",
                        attempt + 1
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reads `{dir}/{source_key}.csv` files laid out like a yfinance download.
pub struct CsvDirFetcher {
    pub dir: PathBuf,
    pub field: PriceField,
}

impl CsvDirFetcher {
    pub fn new(dir: impl Into<PathBuf>, field: PriceField) -> Self {
        Self {
            dir: dir.into(),
            field,
        }
    }
}

impl Fetcher for CsvDirFetcher {
    fn fetch(&self, source_key: &str, range: &DateRange) -> Result<Series, FetchError> {
        let path = self.dir.join(format!("{source_key}.csv"));

        let bars = match load_price_bars(&path) {
            Ok(bars) => bars,
            // a key with no file is an empty answer, not a broken source
            Err(FetchError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                return Ok(Series::new(source_key))
            }
            Err(e) => return Err(e),
        };

        Ok(Series::from_bars(source_key, &bars, self.field).clip(range))
    }
}

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn cell(record: &csv::StringRecord, ix: Option<usize>) -> Option<&str> {
    ix.and_then(|ix| record.get(ix))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn load_price_bars(
    path: impl AsRef<Path>,
) -> Result<BTreeMap<NaiveDate, PriceBar>, FetchError> {
    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();

    let date_ix = column(&headers, &["date"])
        .ok_or_else(|| FetchError::Parse("missing Date column".into()))?;
    let close_ix = column(&headers, &["close"])
        .ok_or_else(|| FetchError::Parse("missing Close column".into()))?;
    let open_ix = column(&headers, &["open"]);
    let high_ix = column(&headers, &["high"]);
    let low_ix = column(&headers, &["low"]);
    let adj_ix = column(&headers, &["adj close", "adj_close", "adjclose"]);
    let volume_ix = column(&headers, &["volume"]);

    let mut bars = BTreeMap::new();

    for record in reader.records() {
        let record = record?;

        // rows without a close are holes in the upstream file
        let Some(close) = cell(&record, Some(close_ix)) else {
            continue;
        };
        let Some(date) = cell(&record, Some(date_ix)) else {
            continue;
        };

        let parse = |ix: Option<usize>| -> Result<Option<Price>, FetchError> {
            Ok(match cell(&record, ix) {
                Some(v) => Some(v.parse::<Price>()?),
                None => None,
            })
        };

        let close: Price = close.parse()?;
        let bar = PriceBar {
            open: parse(open_ix)?.unwrap_or(close),
            high: parse(high_ix)?.unwrap_or(close),
            low: parse(low_ix)?.unwrap_or(close),
            close,
            adj_close: parse(adj_ix)?,
            volume: parse(volume_ix)?.unwrap_or_default() as u64,
        };

        // date strings may carry a time part ("2024-01-02 00:00:00-05:00")
        let date = NaiveDate::parse_from_str(date.get(..10).unwrap_or(date), "%Y-%m-%d")?;
        bars.insert(date, bar);
    }

    Ok(bars
        .into_iter()
        .filter(|(_, bar)| bar.close != 0f64)
        .collect())
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjCloseBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<Price>>,
    #[serde(default)]
    high: Vec<Option<Price>>,
    #[serde(default)]
    low: Vec<Option<Price>>,
    #[serde(default)]
    close: Vec<Option<Price>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct AdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<Price>>,
}

fn at<T: Copy>(values: &[Option<T>], ix: usize) -> Option<T> {
    values.get(ix).copied().flatten()
}

/// Turns a v8 chart document into typed bars. When several quote or
/// adjclose blocks are stacked, the first one is used.
pub fn parse_chart(body: &str) -> Result<BTreeMap<NaiveDate, PriceBar>, FetchError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;

    if let Some(error) = envelope.chart.error {
        return Err(FetchError::Upstream(format!(
            "{}: {}",
            error.code, error.description
        )));
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(BTreeMap::new());
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|block| block.adjclose)
        .filter(|values| values.iter().any(Option::is_some));

    let mut bars = BTreeMap::new();

    for (ix, ts) in result.timestamp.iter().enumerate() {
        let Some(close) = at(&quote.close, ix) else {
            continue;
        };
        let Some(date) = DateTime::from_timestamp(ts + result.meta.gmtoffset, 0) else {
            return Err(FetchError::Parse(format!("timestamp out of range: {ts}")));
        };

        let adj_close = match &adjclose {
            // adjusted column present: a hole there is a hole in the series
            Some(values) => match at(values, ix) {
                Some(v) => Some(v),
                None => continue,
            },
            None => None,
        };

        bars.insert(
            date.date_naive(),
            PriceBar {
                open: at(&quote.open, ix).unwrap_or(close),
                high: at(&quote.high, ix).unwrap_or(close),
                low: at(&quote.low, ix).unwrap_or(close),
                close,
                adj_close,
                volume: at(&quote.volume, ix).unwrap_or_default(),
            },
        );
    }

    Ok(bars)
}

pub struct YahooChartFetcher {
    client: reqwest::blocking::Client,
    base: String,
    field: PriceField,
    retry: RetryPolicy,
}

impl YahooChartFetcher {
    pub fn new(config: &BoardConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("market-board/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base: config.yahoo_base.trim_end_matches('/').to_string(),
            field: config.price_field,
            retry: RetryPolicy {
                attempts: config.fetch_attempts,
                ..Default::default()
            },
        })
    }

    fn url(&self, source_key: &str, range: &DateRange) -> String {
        let epoch = |date: NaiveDate| {
            date.and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or_default()
        };

        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history&includeAdjustedClose=true",
            self.base,
            source_key,
            epoch(range.start),
            epoch(range.end)
        )
    }

    fn get(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        let body = response.text()?;

        if status.is_success() {
            return Ok(body);
        }

        // unknown symbols come back as 404 with a chart error document
        match parse_chart(&body) {
            Err(e @ FetchError::Upstream(_)) => Err(e),
            _ => Err(FetchError::Status {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            }),
        }
    }
}

impl Fetcher for YahooChartFetcher {
    fn fetch(&self, source_key: &str, range: &DateRange) -> Result<Series, FetchError> {
        if range.is_empty() {
            return Ok(Series::new(source_key));
        }

        let url = self.url(source_key, range);
        info!(key = source_key, %range, "downloading chart");

        let body = self.retry.run(source_key, || self.get(&url))?;
        let bars = parse_chart(&body)?;

        Ok(Series::from_bars(source_key, &bars, self.field).clip(range))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, fs, time::Duration};

    use chrono::NaiveDate;

    use super::{
        fetch_all, fetch_outcome, parse_chart, CsvDirFetcher, FetchOutcome, Fetcher, RetryPolicy,
    };
    use crate::{
        error::FetchError,
        model::{DateRange, Entity, PriceField, Series},
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn january() -> DateRange {
        DateRange::new(day(1), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
    }

    struct Flaky;

    impl Fetcher for Flaky {
        fn fetch(&self, source_key: &str, _: &DateRange) -> Result<Series, FetchError> {
            match source_key {
                "EMPTY" => Ok(Series::new(source_key)),
                "BROKEN" => Err(FetchError::Parse("garbage".into())),
                _ => Ok(Series::from_points(source_key, [(day(2), 1.0)])),
            }
        }
    }

    #[test]
    fn unittest_outcome_never_escapes() {
        let entities = [
            Entity::new("ok", "OK"),
            Entity::new("empty", "EMPTY"),
            Entity::new("broken", "BROKEN"),
        ];
        let refs = entities.iter().collect::<Vec<_>>();
        let fetched = fetch_all(&Flaky, &refs, &january());

        assert_eq!(fetched.len(), 3);
        assert!(fetched[0].outcome.is_loaded());
        assert!(matches!(
            fetched[1].outcome,
            FetchOutcome::NoData {
                cause: FetchError::Empty
            }
        ));
        assert!(fetched[2].warning().unwrap().contains("garbage"));

        let single = fetch_outcome(&Flaky, &entities[0], &january());
        assert_eq!(single.outcome.series().map(Series::len), Some(1));
    }

    #[test]
    fn unittest_retry_only_transient() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };

        let calls = Cell::new(0);
        let result: Result<(), _> = policy.run("t", || {
            calls.set(calls.get() + 1);
            Err(FetchError::Status {
                status: 503,
                message: String::new(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let result: Result<(), _> = policy.run("t", || {
            calls.set(calls.get() + 1);
            Err(FetchError::Parse("bad".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unittest_parse_chart_with_nulls_and_stacked_blocks() -> eyre::Result<()> {
        // 2024-01-02, 2024-01-03, 2024-01-04 at 00:00 UTC
        let body = r#"{"chart":{"result":[{
            "meta":{"gmtoffset":0},
            "timestamp":[1704153600,1704240000,1704326400],
            "indicators":{
                "quote":[
                    {"open":[1,2,3],"high":[1,2,3],"low":[1,2,3],"close":[10.0,null,12.0],"volume":[5,null,7]},
                    {"close":[99.0,99.0,99.0]}
                ],
                "adjclose":[{"adjclose":[9.5,null,11.5]}]
            }
        }],"error":null}}"#;

        let bars = parse_chart(body)?;
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[&day(2)].close, 10.0);
        assert_eq!(bars[&day(2)].adj_close, Some(9.5));
        assert_eq!(bars[&day(4)].volume, 7);

        let series = Series::from_bars("X", &bars, PriceField::AdjClose);
        assert_eq!(series.points[&day(4)], 11.5);
        Ok(())
    }

    #[test]
    fn unittest_parse_chart_error_document() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(parse_chart(body), Err(FetchError::Upstream(_))));
        assert!(matches!(parse_chart("<html>"), Err(FetchError::Parse(_))));
    }

    #[test]
    fn unittest_csv_dir_fetcher() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("AAPL.csv"),
            "Date,Open,High,Low,Close,Adj Close,Volume\n\
             2024-01-02,1,1,1,10.0,9.0,100\n\
             2024-01-03,1,1,1,,,0\n\
             2024-01-04,1,1,1,0,0,0\n\
             2024-01-05,1,1,1,12.0,11.0,100\n\
             2023-12-29,1,1,1,8.0,7.0,100\n",
        )?;

        let fetcher = CsvDirFetcher::new(dir.path(), PriceField::AdjClose);
        let series = fetcher.fetch("AAPL", &january())?;
        assert_eq!(
            series.points.into_iter().collect::<Vec<_>>(),
            vec![(day(2), 9.0), (day(5), 11.0)]
        );

        let close_only =
            CsvDirFetcher::new(dir.path(), PriceField::Close).fetch("AAPL", &january())?;
        assert_eq!(close_only.points[&day(5)], 12.0);

        assert!(fetcher.fetch("MISSING", &january())?.is_empty());
        Ok(())
    }

    #[test]
    fn unittest_csv_partly_blank_adjusted_column() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("GAP.csv"),
            "Date,Close,Adj Close\n\
             2024-01-02,100,50\n\
             2024-01-03,100,\n\
             2024-01-04,100,50\n",
        )?;
        fs::write(
            dir.path().join("RAW.csv"),
            "Date,Close,Adj Close\n\
             2024-01-02,100,\n\
             2024-01-03,101,\n",
        )?;

        let fetcher = CsvDirFetcher::new(dir.path(), PriceField::AdjClose);
        let gap = fetcher.fetch("GAP", &january())?;
        assert_eq!(
            gap.points.into_iter().collect::<Vec<_>>(),
            vec![(day(2), 50.0), (day(4), 50.0)]
        );

        let raw = fetcher.fetch("RAW", &january())?;
        assert_eq!(raw.points.values().copied().collect::<Vec<_>>(), vec![100.0, 101.0]);
        Ok(())
    }
}
