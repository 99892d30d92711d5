use std::fmt::Write;

use chrono::NaiveDate;
use eyre::bail;
use itertools::Itertools;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    aggregate::Table,
    analysis::ColumnSummary,
    catalog::Catalog,
    model::{DisplayMode, Entity, Price},
    pipeline::{DashboardView, PriceReport},
};

const SPARKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub trait ChartPresenter {
    fn render(&self, report: &PriceReport) -> eyre::Result<String>;
}

fn y_label(mode: DisplayMode) -> &'static str {
    match mode {
        DisplayMode::Absolute => "price",
        DisplayMode::Normalized => "rebased (first value = 100)",
    }
}

pub fn sparkline(values: &[Option<Price>], width: usize) -> String {
    let known = values.iter().flatten().copied().collect_vec();
    let Some((lo, hi)) = known.iter().copied().minmax().into_option() else {
        return String::new();
    };
    if values.is_empty() || width == 0 {
        return String::new();
    }

    let step = (values.len() as f64 / width as f64).max(1.0);
    let mut out = String::new();
    let mut at = 0.0;

    while (at as usize) < values.len() {
        out.push(match values[at as usize] {
            Some(v) if hi > lo => {
                let ix = ((v - lo) / (hi - lo) * (SPARKS.len() - 1) as f64).round() as usize;
                SPARKS[ix.min(SPARKS.len() - 1)]
            }
            Some(_) => SPARKS[SPARKS.len() / 2],
            None => ' ',
        });
        at += step;
    }

    out
}

/// Terminal rendering: latest rows plus a sparkline per column.
pub struct TextChart {
    pub rows: usize,
    pub width: usize,
    pub summaries: Option<Vec<ColumnSummary>>,
}

impl Default for TextChart {
    fn default() -> Self {
        Self {
            rows: 10,
            width: 60,
            summaries: None,
        }
    }
}

impl TextChart {
    fn table(&self, out: &mut String, table: &Table) -> std::fmt::Result {
        let names = table.names();
        let widths = names.iter().map(|n| n.chars().count().max(10)).collect_vec();

        write!(out, "{:<10}", "date")?;
        for (name, w) in names.iter().zip(widths.iter().copied()) {
            write!(out, "  {name:>w$}")?;
        }
        writeln!(out)?;

        for (date, row) in table.tail(self.rows).rows() {
            write!(out, "{date}")?;
            for (value, w) in row.iter().zip(widths.iter().copied()) {
                match value {
                    Some(v) => write!(out, "  {v:>w$.2}")?,
                    None => write!(out, "  {:>w$}", "-")?,
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn summaries(&self, out: &mut String, summaries: &[ColumnSummary]) -> std::fmt::Result {
        writeln!(
            out,
            "{:<28} {:>6} {:>12} {:>12} {:>12} {:>12} {:>12} {:>9}",
            "column", "count", "mean", "std", "min", "median", "max", "return"
        )?;
        for s in summaries {
            writeln!(
                out,
                "{:<28} {:>6} {:>12.2} {:>12} {:>12.2} {:>12.2} {:>12.2} {:>9}",
                s.name,
                s.count,
                s.mean,
                s.std.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into()),
                s.min,
                s.median,
                s.max,
                s.period_return
                    .map(|r| format!("{:+.1}%", r * 100.0))
                    .unwrap_or_else(|| "-".into()),
            )?;
        }
        Ok(())
    }
}

impl ChartPresenter for TextChart {
    fn render(&self, report: &PriceReport) -> eyre::Result<String> {
        let mut out = String::new();
        writeln!(out, "{} [{}] {}", report.title, report.range, report.mode)?;

        for warning in &report.warnings {
            writeln!(out, "warning: {warning}")?;
        }

        match &report.view {
            DashboardView::Empty { message } => writeln!(out, "{message}")?,
            DashboardView::NoData { message } => writeln!(out, "{message}")?,
            DashboardView::Chart(normalized) => {
                writeln!(
                    out,
                    "{} of {} loaded, {}",
                    report.loaded,
                    report.requested,
                    y_label(report.mode)
                )?;
                writeln!(out)?;

                let pad = normalized
                    .table
                    .names()
                    .iter()
                    .map(|n| n.chars().count())
                    .max()
                    .unwrap_or_default();
                for column in &normalized.table.columns {
                    writeln!(
                        out,
                        "{:<pad$}  {}",
                        column.name,
                        sparkline(&column.values, self.width)
                    )?;
                }
                writeln!(out)?;
                self.table(&mut out, &normalized.table)?;

                if let Some(summaries) = &self.summaries {
                    writeln!(out)?;
                    self.summaries(&mut out, summaries)?;
                }
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct SeriesDocument<'a> {
    name: &'a str,
    values: &'a [Option<Price>],
}

#[derive(Debug, Serialize)]
struct ChartDocument<'a> {
    title: &'a str,
    y_label: &'a str,
    state: &'static str,
    message: Option<&'a str>,
    dates: &'a [NaiveDate],
    series: Vec<SeriesDocument<'a>>,
    warnings: &'a [String],
    unscaled: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    summaries: Option<&'a [ColumnSummary]>,
}

/// A plotting-tool friendly document with one series per column.
#[derive(Default)]
pub struct JsonChart {
    pub summaries: Option<Vec<ColumnSummary>>,
}

impl ChartPresenter for JsonChart {
    fn render(&self, report: &PriceReport) -> eyre::Result<String> {
        let mut doc = ChartDocument {
            title: &report.title,
            y_label: y_label(report.mode),
            state: "chart",
            message: None,
            dates: &[],
            series: Vec::new(),
            warnings: &report.warnings,
            unscaled: &[],
            summaries: self.summaries.as_deref(),
        };

        match &report.view {
            DashboardView::Empty { message } => {
                doc.state = "empty";
                doc.message = Some(message.as_str());
            }
            DashboardView::NoData { message } => {
                doc.state = "no_data";
                doc.message = Some(message.as_str());
            }
            DashboardView::Chart(normalized) => {
                doc.dates = &normalized.table.dates;
                doc.unscaled = &normalized.unscaled;
                doc.series = normalized
                    .table
                    .columns
                    .iter()
                    .map(|c| SeriesDocument {
                        name: &c.name,
                        values: &c.values,
                    })
                    .collect();
            }
        }

        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub popup: String,
    pub tooltip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Marker {
    fn from_entity(entity: &Entity) -> Option<Self> {
        let (lat, lon) = entity.coords()?;
        let description = entity.description.as_deref().unwrap_or_default().trim();

        Some(Self {
            name: entity.display_name.clone(),
            lat,
            lon,
            popup: format!("<b>{}</b><br>{description}", entity.display_name),
            tooltip: entity.display_name.clone(),
            image: entity.image_url.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapView {
    pub title: String,
    pub center: (f64, f64),
    pub zoom: u8,
    pub markers: Vec<Marker>,
    /// Selected entities that carry no coordinates.
    pub skipped: Vec<String>,
}

pub const DEFAULT_ZOOM: u8 = 12;

impl MapView {
    /// An empty selection maps the whole catalog.
    pub fn from_catalog(catalog: &Catalog, selection: &[String]) -> eyre::Result<Self> {
        let entities = if selection.is_empty() {
            catalog.entities().iter().collect_vec()
        } else {
            catalog.select(selection)?
        };

        let mut markers = Vec::new();
        let mut skipped = Vec::new();
        for entity in entities {
            match Marker::from_entity(entity) {
                Some(marker) => markers.push(marker),
                None => skipped.push(entity.display_name.clone()),
            }
        }

        if markers.is_empty() {
            bail!("nothing in '{}' has coordinates to map", catalog.title);
        }

        let center = catalog.center.unwrap_or_else(|| {
            let n = markers.len() as f64;
            (
                markers.iter().map(|m| m.lat).sum::<f64>() / n,
                markers.iter().map(|m| m.lon).sum::<f64>() / n,
            )
        });

        Ok(Self {
            title: catalog.title.clone(),
            center,
            zoom: catalog.zoom.unwrap_or(DEFAULT_ZOOM),
            markers,
            skipped,
        })
    }

    /// GeoJSON FeatureCollection; coordinates are `[lon, lat]`.
    pub fn to_geojson(&self) -> Value {
        let features = self
            .markers
            .iter()
            .map(|m| {
                json!({
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [m.lon, m.lat] },
                    "properties": {
                        "name": m.name,
                        "popup": m.popup,
                        "tooltip": m.tooltip,
                        "image": m.image,
                    },
                })
            })
            .collect_vec();

        json!({
            "type": "FeatureCollection",
            "properties": {
                "title": self.title,
                "center": [self.center.1, self.center.0],
                "zoom": self.zoom,
            },
            "features": features,
        })
    }

    pub fn to_text(&self, catalog: &Catalog) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} (center {:.4}, {:.4}, zoom {})",
            self.title, self.center.0, self.center.1, self.zoom
        );

        for marker in &self.markers {
            let _ = writeln!(out, "\n{} [{:.4}, {:.4}]", marker.name, marker.lat, marker.lon);
            if let Some(text) = catalog
                .get(&marker.name)
                .and_then(|e| e.description.as_deref())
            {
                let _ = writeln!(out, "  {}", text.trim());
            }
            if let Some(image) = &marker.image {
                let _ = writeln!(out, "  {image}");
            }
        }
        for name in &self.skipped {
            let _ = writeln!(out, "\nwarning: {name} has no coordinates");
        }

        out
    }
}
