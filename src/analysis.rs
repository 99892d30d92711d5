use itertools::Itertools;
use serde::Serialize;

use crate::{
    aggregate::{Column, Table},
    utils::{quantile, RunningMean},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` below two observations.
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
    /// `last / first - 1` over the column.
    pub period_return: Option<f64>,
}

pub fn summarize(column: &Column) -> Option<ColumnSummary> {
    let sorted = column
        .values
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .sorted_by(|a, b| a.total_cmp(b))
        .collect_vec();

    let mean = sorted.iter().copied().collect::<RunningMean>().avg()?;
    let count = sorted.len();

    let std = (count > 1).then(|| {
        let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    });

    let period_return = match (column.first_value(), column.last_value()) {
        (Some(first), Some(last)) if first != 0.0 => Some(last / first - 1.0),
        _ => None,
    };

    Some(ColumnSummary {
        name: column.name.clone(),
        count,
        mean,
        std,
        min: sorted[0],
        q25: quantile(&sorted, 0.25)?,
        median: quantile(&sorted, 0.5)?,
        q75: quantile(&sorted, 0.75)?,
        max: sorted[count - 1],
        period_return,
    })
}

/// Per-column statistics, in column order.
pub fn describe(table: &Table) -> Vec<ColumnSummary> {
    table.columns.iter().filter_map(summarize).collect()
}

#[cfg(test)]
mod tests {
    use super::{describe, summarize};
    use crate::aggregate::{Column, Table};

    #[test]
    fn unittest_describe_column() {
        let column = Column {
            name: "A".into(),
            values: vec![Some(2.0), None, Some(4.0), Some(4.0), Some(6.0)],
        };
        let s = summarize(&column).unwrap();

        assert_eq!(s.count, 4);
        assert_eq!(s.mean, 4.0);
        assert!((s.std.unwrap() - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!((s.min, s.median, s.max), (2.0, 4.0, 6.0));
        assert_eq!(s.q25, 3.5);
        assert_eq!(s.period_return, Some(2.0));
    }

    #[test]
    fn unittest_describe_skips_blank_columns() {
        let table = Table {
            dates: vec![],
            columns: vec![
                Column {
                    name: "blank".into(),
                    values: vec![],
                },
                Column {
                    name: "one".into(),
                    values: vec![Some(1.0)],
                },
            ],
        };
        let summaries = describe(&table);

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].std, None);
    }
}
