use crate::{aggregate::Table, model::DisplayMode};

pub const BASELINE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub table: Table,
    pub mode: DisplayMode,
    /// Columns left in raw values because their first known value was zero.
    pub unscaled: Vec<String>,
}

impl Normalized {
    pub fn warnings(&self) -> Vec<String> {
        self.unscaled
            .iter()
            .map(|name| format!("{name}: no usable baseline, shown unscaled"))
            .collect()
    }
}

/// Rebases every column so that its first known value reads 100. Leading
/// gaps stay gaps.
pub fn normalize(table: &Table, mode: DisplayMode) -> Normalized {
    let mut out = table.clone();
    let mut unscaled = Vec::new();

    if mode == DisplayMode::Normalized {
        for column in out.columns.iter_mut() {
            match column.first_value() {
                Some(base) if base != 0.0 && base.is_finite() => {
                    for value in column.values.iter_mut().flatten() {
                        *value = *value / base * BASELINE;
                    }
                }
                _ => unscaled.push(column.name.clone()),
            }
        }
    }

    Normalized {
        table: out,
        mode,
        unscaled,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::normalize;
    use crate::{
        aggregate::{aggregate, FillPolicy},
        model::{DisplayMode, Series},
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn unittest_rebase_to_hundred() {
        let table = aggregate(
            &[(
                "A".into(),
                Series::from_points("A", [(day(1), 50.0), (day(2), 75.0), (day(3), 25.0)]),
            )],
            FillPolicy::Forward,
        );

        let n = normalize(&table, DisplayMode::Normalized);
        assert_eq!(
            n.table.column("A").unwrap().values,
            vec![Some(100.0), Some(150.0), Some(50.0)]
        );
        assert!(n.unscaled.is_empty());

        let a = normalize(&table, DisplayMode::Absolute);
        assert_eq!(a.table, table);
    }

    #[test]
    fn unittest_zero_baseline_left_unscaled() {
        let table = aggregate(
            &[("Z".into(), Series::from_points("Z", [(day(1), 0.0), (day(2), 5.0)]))],
            FillPolicy::Forward,
        );

        let n = normalize(&table, DisplayMode::Normalized);
        assert_eq!(n.unscaled, vec!["Z".to_string()]);
        assert_eq!(n.table, table);
        assert_eq!(n.warnings().len(), 1);
    }

    #[test]
    fn unittest_late_starting_column_rebased_on_own_first_value() {
        let table = aggregate(
            &[
                (
                    "A".into(),
                    Series::from_points("A", [(day(1), 10.0), (day(2), 20.0), (day(3), 30.0)]),
                ),
                (
                    "B".into(),
                    Series::from_points("B", [(day(2), 5000.0), (day(3), 5500.0)]),
                ),
            ],
            FillPolicy::Forward,
        );

        let n = normalize(&table, DisplayMode::Normalized);
        assert!(n.unscaled.is_empty());
        assert_eq!(
            n.table.column("A").unwrap().values,
            vec![Some(100.0), Some(200.0), Some(300.0)]
        );
        assert_eq!(
            n.table.column("B").unwrap().values,
            vec![None, Some(100.0), Some(110.0)]
        );
    }
}
