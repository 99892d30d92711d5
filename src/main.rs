use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use eyre::WrapErr;
use market_board::{
    analysis::describe,
    cache::CachedFetcher,
    catalog::{self, Catalog},
    config::{BoardConfig, MAX_RANGE_DAYS},
    explorer::{build_chart, iris, random_dataset, ChartKind, ChartRequest},
    grades::{self, ScoreSheet},
    loader::{CsvDirFetcher, Fetcher, YahooChartFetcher},
    model::{DateRange, DisplayMode, PriceField, Selection},
    pipeline::PriceBoard,
    present::{sparkline, ChartPresenter, JsonChart, MapView, TextChart},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "market-board",
    version,
    about = "Price, map, grade and chart dashboards for the terminal",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare price histories across a catalog
    Prices(PricesArgs),
    /// Landmark markers as text or GeoJSON
    Map(MapArgs),
    /// Synthetic score sheets and next-exam predictions
    Grades {
        #[command(subcommand)]
        command: GradesCommand,
    },
    /// Chart a random dataset
    Explore(ExploreArgs),
    /// List built-in catalogs or the entities of one
    Catalog { name: Option<String> },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Absolute,
    Normalized,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Yahoo,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldArg {
    AdjClose,
    Close,
}

#[derive(Clone, Copy, ValueEnum)]
enum DatasetArg {
    Random,
    Iris,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChartArg {
    Scatter,
    Line,
    Bar,
    Histogram,
}

#[derive(Parser)]
struct PricesArgs {
    /// Built-in catalog name (stocks, crypto) or a catalog JSON file
    #[arg(long, default_value = "stocks")]
    catalog: String,

    /// Display names to chart. Omit for the whole catalog; pass with no value for none.
    #[arg(long, num_args = 0..)]
    select: Option<Vec<String>>,

    #[arg(long, value_enum, default_value_t = ModeArg::Normalized)]
    mode: ModeArg,

    /// Trailing window in days (default from BOARD_RANGE_DAYS, else three years)
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(1..=MAX_RANGE_DAYS as i64)
    )]
    days: Option<u32>,

    /// Also pull the first known value back over leading gaps
    #[arg(long, default_value_t = false)]
    backfill: bool,

    #[arg(long, value_enum, default_value_t = SourceArg::Yahoo)]
    source: SourceArg,

    /// Directory of `<source_key>.csv` files for `--source csv`
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    price_field: Option<FieldArg>,

    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,

    /// Append per-column statistics
    #[arg(long, default_value_t = false)]
    describe: bool,

    /// Rows of the table to show in text output
    #[arg(long, default_value_t = 10)]
    rows: usize,
}

#[derive(Parser)]
struct MapArgs {
    #[arg(long, default_value = "tokyo")]
    catalog: String,

    /// Landmarks to show; all when omitted
    #[arg(long)]
    select: Vec<String>,

    /// Write GeoJSON here instead of printing a summary
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum GradesCommand {
    /// Write a random score sheet
    Generate {
        #[arg(long, default_value_t = grades::DEFAULT_STUDENTS)]
        students: usize,
        #[arg(long, default_value_t = grades::DEFAULT_EXAMS)]
        exams: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "student_scores.csv")]
        output: PathBuf,
    },
    /// Sheet size, missing cells and per-column statistics
    Overview {
        #[arg(long, default_value = "student_scores.csv")]
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Averages, score trends and next-exam predictions for one student
    Report {
        #[arg(long, default_value = "student_scores.csv")]
        input: PathBuf,
        /// Student label; the first row when omitted
        #[arg(long)]
        student: Option<String>,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
}

#[derive(Parser)]
struct ExploreArgs {
    #[arg(long, value_enum, default_value_t = DatasetArg::Random)]
    dataset: DatasetArg,
    /// Rows of the random dataset
    #[arg(long, default_value_t = 100)]
    rows: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum, default_value_t = ChartArg::Scatter)]
    chart: ChartArg,
    #[arg(long, default_value = "x")]
    x: String,
    #[arg(long)]
    y: Option<String>,
    /// Group scatter points by this column
    #[arg(long)]
    color: Option<String>,
    /// Size scatter points by this numeric column
    #[arg(long)]
    size: Option<String>,
    #[arg(long, default_value_t = 10)]
    bins: usize,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prices(args) => prices(args),
        Commands::Map(args) => map(args),
        Commands::Grades { command } => grades(command),
        Commands::Explore(args) => explore(args),
        Commands::Catalog { name } => list_catalog(name),
    }
}

fn prices(args: PricesArgs) -> eyre::Result<()> {
    let mut config = BoardConfig::from_env();
    if args.backfill {
        config = config.with_backfill(true);
    }
    if let Some(days) = args.days {
        config = config.with_range_days(days);
    }
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(field) = args.price_field {
        config = config.with_price_field(match field {
            FieldArg::AdjClose => PriceField::AdjClose,
            FieldArg::Close => PriceField::Close,
        });
    }

    let catalog = Catalog::resolve(&args.catalog)?;
    let range = DateRange::trailing_days(Local::now().date_naive(), config.range_days);

    match args.source {
        SourceArg::Yahoo => {
            let fetcher = CachedFetcher::new(YahooChartFetcher::new(&config)?, config.cache_ttl);
            render_prices(&args, &catalog, &config, &range, fetcher)
        }
        SourceArg::Csv => {
            let fetcher = CachedFetcher::new(
                CsvDirFetcher::new(&config.data_dir, config.price_field),
                config.cache_ttl,
            );
            render_prices(&args, &catalog, &config, &range, fetcher)
        }
    }
}

fn render_prices<F: Fetcher + Sync>(
    args: &PricesArgs,
    catalog: &Catalog,
    config: &BoardConfig,
    range: &DateRange,
    fetcher: F,
) -> eyre::Result<()> {
    let mode = match args.mode {
        ModeArg::Absolute => DisplayMode::Absolute,
        ModeArg::Normalized => DisplayMode::Normalized,
    };

    let board = PriceBoard::new(catalog, config, fetcher);
    let selection = match &args.select {
        Some(names) => Selection::new(
            names
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            mode,
        ),
        None => board.default_selection(mode),
    };

    let report = board.run(&selection, range)?;
    let summaries = args.describe.then(|| describe(&report.table));

    let rendered = match args.format {
        FormatArg::Text => TextChart {
            rows: args.rows,
            summaries,
            ..Default::default()
        }
        .render(&report)?,
        FormatArg::Json => JsonChart { summaries }.render(&report)?,
    };

    println!("{rendered}");
    Ok(())
}

fn map(args: MapArgs) -> eyre::Result<()> {
    let catalog = Catalog::resolve(&args.catalog)?;
    let view = MapView::from_catalog(&catalog, &args.select)?;

    for name in &view.skipped {
        warn!(entity = %name, "no coordinates, left off the map");
    }

    match &args.output {
        Some(path) => {
            fs::write(path, serde_json::to_string_pretty(&view.to_geojson())?)
                .wrap_err_with(|| format!("cannot write {}", path.display()))?;
            info!(path = %path.display(), markers = view.markers.len(), "map written");
        }
        None => print!("{}", view.to_text(&catalog)),
    }
    Ok(())
}

fn grades(command: GradesCommand) -> eyre::Result<()> {
    match command {
        GradesCommand::Generate {
            students,
            exams,
            seed,
            output,
        } => {
            let sheet = grades::generate(
                students,
                &grades::DEFAULT_SUBJECTS,
                exams,
                seed.unwrap_or_else(rand::random),
            );
            sheet.write_csv(&output)?;

            let overview = sheet.overview();
            println!(
                "{} students x {} columns written to {}",
                overview.students,
                overview.columns,
                output.display()
            );
            Ok(())
        }
        GradesCommand::Overview { input, format } => {
            let sheet = load_sheet(&input)?;
            let overview = sheet.overview();
            let stats = sheet.describe();

            match format {
                FormatArg::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "overview": overview,
                        "columns": stats,
                    }))?
                ),
                FormatArg::Text => {
                    println!(
                        "{} students, {} exam columns, {} missing cells",
                        overview.students, overview.columns, overview.missing
                    );
                    println!(
                        "\n  {:<16} {:>5} {:>7} {:>7} {:>5} {:>7} {:>7} {:>7} {:>5}",
                        "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
                    );
                    for s in &stats {
                        let spread = s.std.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into());
                        println!(
                            "  {:<16} {:>5} {:>7.2} {:>7} {:>5} {:>7.2} {:>7.2} {:>7.2} {:>5}",
                            s.name, s.count, s.mean, spread, s.min, s.q25, s.median, s.q75, s.max
                        );
                    }
                }
            }
            Ok(())
        }
        GradesCommand::Report {
            input,
            student,
            format,
        } => {
            let sheet = load_sheet(&input)?;

            let label = match student.or_else(|| sheet.students.first().map(|s| s.label.clone())) {
                Some(label) => label,
                None => {
                    println!("The score sheet has no students.");
                    return Ok(());
                }
            };

            let overview = sheet.overview();
            let averages = sheet.subject_averages(&label)?;
            let trend = sheet.score_trend(&label)?;
            let predictions = sheet.predict_student(&label)?;

            match format {
                FormatArg::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "overview": overview,
                        "student": label,
                        "averages": averages,
                        "trend": trend,
                        "predictions": predictions,
                    }))?
                ),
                FormatArg::Text => {
                    println!(
                        "{} students, {} exam columns, {} missing cells",
                        overview.students, overview.columns, overview.missing
                    );
                    println!("\n{label}: subject averages");
                    for (subject, average) in &averages {
                        match average {
                            Some(avg) => println!("  {subject:<12} {avg:>6.2}"),
                            None => println!("  {subject:<12}      -"),
                        }
                    }
                    println!("\n{label}: scores by exam");
                    for t in &trend {
                        let scores = t.scores.iter().map(|s| s.map(f64::from)).collect::<Vec<_>>();
                        println!("  {:<12} {}", t.subject, sparkline(&scores, sheet.exams));
                    }
                    println!("\n{label}: predicted exam {}", sheet.exams + 1);
                    for p in &predictions {
                        println!("  {:<12} {}", p.subject, p.prediction);
                    }
                }
            }
            Ok(())
        }
    }
}

fn load_sheet(input: &Path) -> eyre::Result<ScoreSheet> {
    if input.exists() {
        return ScoreSheet::read_csv(input);
    }

    warn!(path = %input.display(), "score sheet not found, generating a fresh one");
    Ok(grades::generate(
        grades::DEFAULT_STUDENTS,
        &grades::DEFAULT_SUBJECTS,
        grades::DEFAULT_EXAMS,
        rand::random(),
    ))
}

fn explore(args: ExploreArgs) -> eyre::Result<()> {
    let data = match args.dataset {
        DatasetArg::Random => random_dataset(args.rows, args.seed.unwrap_or_else(rand::random)),
        DatasetArg::Iris => iris()?,
    };
    let kind = match args.chart {
        ChartArg::Scatter => ChartKind::Scatter,
        ChartArg::Line => ChartKind::Line,
        ChartArg::Bar => ChartKind::Bar,
        ChartArg::Histogram => ChartKind::Histogram,
    };

    let request = ChartRequest {
        kind,
        x: &args.x,
        y: args.y.as_deref(),
        color: args.color.as_deref(),
        size: args.size.as_deref(),
        bins: args.bins,
    };

    let chart = build_chart(&data, &request)?;
    println!("{}", serde_json::to_string_pretty(&chart)?);
    Ok(())
}

fn list_catalog(name: Option<String>) -> eyre::Result<()> {
    let Some(name) = name else {
        for name in catalog::BUILTIN_NAMES {
            println!("{name}");
        }
        return Ok(());
    };

    let catalog = Catalog::resolve(&name)?;
    println!("{}", catalog.title);
    for entity in catalog.entities() {
        match entity.coords() {
            Some((lat, lon)) => println!(
                "  {:<32} {:<12} [{lat:.4}, {lon:.4}]",
                entity.display_name, entity.source_key
            ),
            None => println!("  {:<32} {}", entity.display_name, entity.source_key),
        }
    }
    Ok(())
}
