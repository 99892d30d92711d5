use std::collections::BTreeSet;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    loader::EntityFetch,
    model::{Price, Series},
};

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPolicy {
    /// Carry the last known value into later gaps.
    #[default]
    Forward,
    /// Forward, then pull the first known value back over leading gaps.
    ForwardBackward,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<Price>>,
}

impl Column {
    pub fn first_value(&self) -> Option<Price> {
        self.values.iter().flatten().next().copied()
    }

    pub fn last_value(&self) -> Option<Price> {
        self.values.iter().rev().flatten().next().copied()
    }

    pub fn is_blank(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    fn fill(&mut self, policy: FillPolicy) {
        let mut last = None;
        for value in self.values.iter_mut() {
            if value.is_some() {
                last = *value;
            } else {
                *value = last;
            }
        }

        if policy == FillPolicy::ForwardBackward {
            if let Some(first) = self.first_value() {
                for value in self.values.iter_mut().take_while(|v| v.is_none()) {
                    *value = Some(first);
                }
            }
        }
    }
}

/// Date-indexed view across entities; every column spans the whole index.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.dates.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Fills gaps per column and drops the columns that stay blank.
    pub fn refill(&mut self, policy: FillPolicy) {
        for column in self.columns.iter_mut() {
            column.fill(policy);
        }
        self.columns.retain(|c| !c.is_blank());
    }

    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, Vec<Option<Price>>)> + '_ {
        self.dates
            .iter()
            .enumerate()
            .map(|(ix, date)| (*date, self.columns.iter().map(|c| c.values[ix]).collect()))
    }

    fn slice(&self, from: usize, to: usize) -> Table {
        Table {
            dates: self.dates[from..to].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: c.values[from..to].to_vec(),
                })
                .collect(),
        }
    }

    pub fn head(&self, n: usize) -> Table {
        self.slice(0, n.min(self.dates.len()))
    }

    pub fn tail(&self, n: usize) -> Table {
        let len = self.dates.len();
        self.slice(len - n.min(len), len)
    }
}

/// Outer-joins the series on date, in the order given.
pub fn aggregate(series: &[(String, Series)], policy: FillPolicy) -> Table {
    let dates = series
        .iter()
        .flat_map(|(_, s)| s.points.keys().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect_vec();

    let columns = series
        .iter()
        .map(|(name, s)| Column {
            name: name.clone(),
            values: dates
                .iter()
                .map(|date| s.points.get(date).copied().filter(|v| v.is_finite()))
                .collect(),
        })
        .collect();

    let mut table = Table { dates, columns };
    table.refill(policy);
    table
}

/// Aggregates whatever loaded; `NoData` entities simply have no column.
pub fn aggregate_fetches(fetches: &[EntityFetch], policy: FillPolicy) -> Table {
    let series = fetches
        .iter()
        .filter_map(|f| {
            f.outcome
                .series()
                .map(|s| (f.display_name.clone(), s.clone()))
        })
        .collect_vec();

    aggregate(&series, policy)
}
