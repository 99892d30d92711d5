use tracing::{info, warn};

use crate::{
    aggregate::{aggregate_fetches, FillPolicy, Table},
    catalog::Catalog,
    config::BoardConfig,
    loader::{fetch_all, Fetcher},
    model::{DateRange, DisplayMode, Selection},
    normalize::{normalize, Normalized},
};

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardView {
    /// Nothing selected; not an error.
    Empty { message: String },
    /// Entities were selected but none produced a point.
    NoData { message: String },
    Chart(Normalized),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceReport {
    pub title: String,
    pub range: DateRange,
    pub mode: DisplayMode,
    pub requested: usize,
    pub loaded: usize,
    /// Per-entity problems, in selection order.
    pub warnings: Vec<String>,
    /// Gap-filled absolute values, before any rebasing.
    pub table: Table,
    pub view: DashboardView,
}

pub struct PriceBoard<'a, F> {
    catalog: &'a Catalog,
    config: &'a BoardConfig,
    fetcher: F,
}

impl<'a, F: Fetcher + Sync> PriceBoard<'a, F> {
    pub fn new(catalog: &'a Catalog, config: &'a BoardConfig, fetcher: F) -> Self {
        Self {
            catalog,
            config,
            fetcher,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        self.catalog
    }

    pub fn default_selection(&self, mode: DisplayMode) -> Selection {
        Selection::new(self.catalog.names(), mode)
    }

    fn fill_policy(&self) -> FillPolicy {
        if self.config.backfill {
            FillPolicy::ForwardBackward
        } else {
            FillPolicy::Forward
        }
    }

    /// One pass of the dashboard for a selection. Only an unknown name is fatal.
    pub fn run(&self, selection: &Selection, range: &DateRange) -> eyre::Result<PriceReport> {
        let mut report = PriceReport {
            title: self.catalog.title.clone(),
            range: *range,
            mode: selection.mode,
            requested: selection.names.len(),
            loaded: 0,
            warnings: Vec::new(),
            table: Table::default(),
            view: DashboardView::Empty {
                message: "Select at least one entity to display.".to_string(),
            },
        };

        if selection.is_empty() {
            info!("empty selection");
            return Ok(report);
        }

        let entities = self.catalog.select(&selection.names)?;
        info!(entities = entities.len(), %range, "fetching");

        let fetches = fetch_all(&self.fetcher, &entities, range);
        report.loaded = fetches.iter().filter(|f| f.outcome.is_loaded()).count();
        report.warnings = fetches.iter().filter_map(|f| f.warning()).collect();

        report.table = aggregate_fetches(&fetches, self.fill_policy());

        if report.table.is_empty() {
            warn!(requested = report.requested, "no entity produced data");
            report.view = DashboardView::NoData {
                message: "None of the selected entities returned usable data.".to_string(),
            };
            return Ok(report);
        }

        let normalized = normalize(&report.table, selection.mode);
        report.warnings.extend(normalized.warnings());
        report.view = DashboardView::Chart(normalized);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DashboardView, PriceBoard};
    use crate::{
        catalog::Catalog,
        config::BoardConfig,
        error::FetchError,
        loader::Fetcher,
        model::{DateRange, DisplayMode, Entity, Selection, Series},
    };

    struct Fixture;

    impl Fetcher for Fixture {
        fn fetch(&self, source_key: &str, _: &DateRange) -> Result<Series, FetchError> {
            let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
            match source_key {
                "DOWN" => Err(FetchError::Status {
                    status: 503,
                    message: "unavailable".into(),
                }),
                "NONE" => Ok(Series::new(source_key)),
                _ => Ok(Series::from_points(
                    source_key,
                    [(day(2), 10.0), (day(3), 20.0)],
                )),
            }
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
    }

    fn catalog() -> Catalog {
        Catalog::new(
            "fixture",
            vec![
                Entity::new("Up", "UP"),
                Entity::new("Down", "DOWN"),
                Entity::new("None", "NONE"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn unittest_empty_selection_is_informational() -> eyre::Result<()> {
        let catalog = catalog();
        let config = BoardConfig::default();
        let board = PriceBoard::new(&catalog, &config, Fixture);

        let report = board.run(&Selection::new(vec![], DisplayMode::Absolute), &range())?;
        assert!(matches!(report.view, DashboardView::Empty { .. }));
        assert!(report.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn unittest_failures_stay_per_entity() -> eyre::Result<()> {
        let catalog = catalog();
        let config = BoardConfig::default();
        let board = PriceBoard::new(&catalog, &config, Fixture);

        let report = board.run(&board.default_selection(DisplayMode::Normalized), &range())?;
        assert_eq!(report.requested, 3);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(report.table.names(), vec!["Up"]);

        match report.view {
            DashboardView::Chart(n) => assert_eq!(
                n.table.column("Up").unwrap().values,
                vec![Some(100.0), Some(200.0)]
            ),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unittest_all_failed_is_no_data() -> eyre::Result<()> {
        let catalog = catalog();
        let config = BoardConfig::default();
        let board = PriceBoard::new(&catalog, &config, Fixture);

        let selection = Selection::new(vec!["Down".into(), "None".into()], DisplayMode::Absolute);
        let report = board.run(&selection, &range())?;
        assert!(matches!(report.view, DashboardView::NoData { .. }));

        let unknown = Selection::new(vec!["Sideways".into()], DisplayMode::Absolute);
        assert!(board.run(&unknown, &range()).is_err());
        Ok(())
    }
}
