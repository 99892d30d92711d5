use std::io::Read;

use derive_more::Display;
use eyre::{bail, eyre};
use itertools::Itertools;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::Serialize;

pub const MIN_ROWS: usize = 10;
pub const MAX_ROWS: usize = 1000;

const IRIS_CSV: &str = include_str!("iris.csv");

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Values {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::Numeric(v) => v.len(),
            Values::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn label(&self, ix: usize) -> Option<String> {
        match self {
            Values::Numeric(v) => v.get(ix).map(f64::to_string),
            Values::Text(v) => v.get(ix).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub columns: Vec<(String, Values)>,
}

impl Dataset {
    /// Columns whose every cell parses as a number are numeric; the rest are text.
    pub fn from_csv(source: impl Read) -> eyre::Result<Self> {
        let mut reader = csv::Reader::from_reader(source);
        let headers = reader.headers()?.clone();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

        for record in reader.records() {
            let record = record?;
            for (ix, column) in cells.iter_mut().enumerate() {
                column.push(record.get(ix).unwrap_or_default().trim().to_string());
            }
        }

        let columns = headers
            .iter()
            .zip(cells)
            .map(|(name, cells)| {
                let parsed = cells
                    .iter()
                    .map(|c| c.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>();
                let values = match parsed {
                    Ok(numbers) if !numbers.is_empty() => Values::Numeric(numbers),
                    _ => Values::Text(cells),
                };
                (name.trim().to_string(), values)
            })
            .collect();

        Ok(Self { columns })
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|(_, v)| v.len()).unwrap_or_default()
    }

    pub fn column(&self, name: &str) -> eyre::Result<&Values> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                eyre!(
                    "no column '{name}' (have: {})",
                    self.columns.iter().map(|(n, _)| n).join(", ")
                )
            })
    }

    fn numeric(&self, name: &str) -> eyre::Result<&[f64]> {
        match self.column(name)? {
            Values::Numeric(v) => Ok(v.as_slice()),
            Values::Text(_) => bail!("column '{name}' is not numeric"),
        }
    }
}

/// `y = i² + 5i + 10` plus gaussian noise, with a three-way category.
pub fn random_dataset(rows: usize, seed: u64) -> Dataset {
    let rows = rows.clamp(MIN_ROWS, MAX_ROWS);
    let mut rng = StdRng::seed_from_u64(seed);

    let x = (0..rows).map(|i| i as f64 * 0.1).collect();
    let y = (0..rows)
        .map(|i| {
            let i = i as f64;
            let noise: f64 = StandardNormal.sample(&mut rng);
            i * i + 5.0 * i + 10.0 + noise * 20.0
        })
        .collect();
    let category = (0..rows)
        .map(|i| format!("Category {}", (i % 3) + 1))
        .collect();

    Dataset {
        columns: vec![
            ("x".into(), Values::Numeric(x)),
            ("y".into(), Values::Numeric(y)),
            ("category".into(), Values::Text(category)),
        ],
    }
}

/// Fisher's iris measurements: four numeric columns plus `species` and `species_id`.
pub fn iris() -> eyre::Result<Dataset> {
    Dataset::from_csv(IRIS_CSV.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    #[display(fmt = "scatter")]
    Scatter,
    #[display(fmt = "line")]
    Line,
    #[display(fmt = "bar")]
    Bar,
    #[display(fmt = "histogram")]
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct ChartRequest<'a> {
    pub kind: ChartKind,
    pub x: &'a str,
    pub y: Option<&'a str>,
    /// Scatter only: one point group per distinct value of this column.
    pub color: Option<&'a str>,
    /// Scatter only: numeric column carried as each point's size.
    pub size: Option<&'a str>,
    pub bins: usize,
}

impl<'a> ChartRequest<'a> {
    pub fn new(kind: ChartKind, x: &'a str) -> Self {
        Self {
            kind,
            x,
            y: None,
            color: None,
            size: None,
            bins: 10,
        }
    }

    pub fn with_y(mut self, y: &'a str) -> Self {
        self.y = Some(y);
        self
    }

    pub fn with_color(mut self, column: &'a str) -> Self {
        self.color = Some(column);
        self
    }

    pub fn with_size(mut self, column: &'a str) -> Self {
        self.size = Some(column);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bin {
    pub label: String,
    pub lo: Option<f64>,
    pub hi: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chart {
    Points {
        title: String,
        line: bool,
        groups: Vec<PointGroup>,
    },
    Bars {
        title: String,
        bars: Vec<(String, f64)>,
    },
    Histogram {
        title: String,
        bins: Vec<Bin>,
    },
}

pub fn histogram(values: &[f64], bins: usize) -> Vec<Bin> {
    let finite = values.iter().copied().filter(|v| v.is_finite()).collect_vec();
    let Some((lo, hi)) = finite.iter().copied().minmax().into_option() else {
        return Vec::new();
    };

    let bins = bins.max(1);
    let width = if hi > lo { (hi - lo) / bins as f64 } else { 1.0 };
    let mut counts = vec![0usize; bins];

    for v in finite {
        // the top edge belongs to the last bucket
        let ix = (((v - lo) / width) as usize).min(bins - 1);
        counts[ix] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(ix, count)| {
            let from = lo + width * ix as f64;
            let to = from + width;
            Bin {
                label: format!("{from:.2}..{to:.2}"),
                lo: Some(from),
                hi: Some(to),
                count,
            }
        })
        .collect()
}

fn category_counts(values: &[String]) -> Vec<Bin> {
    values
        .iter()
        .counts()
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
        .map(|(label, count)| Bin {
            label: label.clone(),
            lo: None,
            hi: None,
            count,
        })
        .collect()
}

pub fn build_chart(data: &Dataset, request: &ChartRequest) -> eyre::Result<Chart> {
    let ChartRequest { kind, x, y, .. } = *request;
    let need_y = || y.ok_or_else(|| eyre!("a {kind} chart needs a y column"));

    if kind != ChartKind::Scatter && (request.color.is_some() || request.size.is_some()) {
        bail!("colour and size grouping only apply to scatter charts");
    }

    Ok(match kind {
        ChartKind::Scatter | ChartKind::Line => {
            let y = need_y()?;
            let xs = data.numeric(x)?;
            let ys = data.numeric(y)?;
            let sizes = request.size.map(|name| data.numeric(name)).transpose()?;
            let colors = request.color.map(|name| data.column(name)).transpose()?;

            // groups keep the order their first point appears in
            let mut groups: Vec<PointGroup> = Vec::new();
            for (ix, (px, py)) in xs.iter().copied().zip(ys.iter().copied()).enumerate() {
                let point = Point {
                    x: px,
                    y: py,
                    size: sizes.and_then(|s| s.get(ix).copied()),
                };
                let name = colors.and_then(|c| c.label(ix));
                match groups.iter_mut().find(|g| g.name == name) {
                    Some(group) => group.points.push(point),
                    None => groups.push(PointGroup {
                        name,
                        points: vec![point],
                    }),
                }
            }

            if kind == ChartKind::Line {
                for group in groups.iter_mut() {
                    group.points.sort_by(|a, b| a.x.total_cmp(&b.x));
                }
            }
            Chart::Points {
                title: format!("{x} vs {y} {kind}"),
                line: kind == ChartKind::Line,
                groups,
            }
        }
        ChartKind::Bar => {
            let y = need_y()?;
            let labels = data.column(x)?;
            let values = data.numeric(y)?;

            // repeated categories stack, so they are summed
            let mut bars: Vec<(String, f64)> = Vec::new();
            for (ix, value) in values.iter().enumerate() {
                let Some(label) = labels.label(ix) else {
                    break;
                };
                match bars.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, total)) => *total += value,
                    None => bars.push((label, *value)),
                }
            }
            Chart::Bars {
                title: format!("{y} by {x}"),
                bars,
            }
        }
        ChartKind::Histogram => Chart::Histogram {
            title: format!("distribution of {x}"),
            bins: match data.column(x)? {
                Values::Numeric(v) => histogram(v, request.bins),
                Values::Text(v) => category_counts(v),
            },
        },
    })
}
