use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use glyph_grid::{
    ColumnMode, DocumentGuides, ExportTable, ExtractOptions, ExtractionReport, ExtractionSession,
    GlyphDump, GlyphSource, InferenceConfig, OrderingStore, OutputField, PageSelection,
    PdfGlyphSource, RowMode, guides_to_rows, parse_text_rows, write_csv,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "grid2csv",
    version,
    about = "Rebuild table grids from positioned PDF text and export CSV"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract guided or inferred tables and write CSV output.
    Extract(ExtractArgs),
    /// Parse plain statement text, one row per line, into transactions.
    Parse(ParseArgs),
    /// Dump persisted guides as normalized rectangles.
    Guides(GuidesArgs),
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Input PDF, or a glyph dump ending in .json.
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV path.
    #[arg(short, long)]
    output: PathBuf,

    /// Persisted selections and manual links.
    #[arg(long)]
    guides: Option<PathBuf>,

    /// Row/column order file; read if present and written back after export.
    #[arg(long)]
    order: Option<PathBuf>,

    /// Page selection like 1-3,5.
    #[arg(long)]
    pages: Option<String>,

    /// Page-to-pixel zoom.
    #[arg(long, default_value_t = 1.25)]
    scale: f64,

    /// Column inference: auto, form or proportional.
    #[arg(long, default_value = "auto")]
    columns: String,

    /// Upper bound for inferred columns.
    #[arg(long)]
    max_cols: Option<usize>,

    /// Use the wider row merge tolerance.
    #[arg(long)]
    relaxed_rows: bool,

    /// Do not synthesize a table over all glyphs of unguided pages.
    #[arg(long)]
    no_smart: bool,

    /// Do not build a table from loose row and column guides.
    #[arg(long)]
    no_auto_build: bool,

    /// Parse rows into transactions instead of raw cells.
    #[arg(long)]
    structured: bool,

    /// Output fields for structured mode, comma separated.
    #[arg(long)]
    fields: Option<String>,

    /// Drop duplicate transactions in structured mode.
    #[arg(long)]
    dedupe: bool,

    /// Output delimiter character.
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Drop page column from output CSV.
    #[arg(long = "nopage")]
    no_page: bool,

    /// Drop table_id column from output CSV.
    #[arg(long = "notable")]
    no_table: bool,

    /// JSON file overriding inference thresholds.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose warning output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Plain text input, one statement row per line.
    #[arg(short, long)]
    input: PathBuf,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(long)]
    fields: Option<String>,

    #[arg(long)]
    dedupe: bool,

    #[arg(long, default_value = ",")]
    delimiter: char,
}

#[derive(Debug, Args)]
struct GuidesArgs {
    #[arg(long)]
    guides: PathBuf,

    /// Document name written into every row.
    #[arg(long)]
    document: String,

    #[arg(short, long)]
    output: PathBuf,
}

fn parse_delimiter(delimiter: char) -> Result<u8> {
    if !delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character");
    }
    Ok(delimiter as u8)
}

fn parse_fields(fields: Option<&str>) -> Result<Vec<OutputField>> {
    fields
        .map(OutputField::parse_list)
        .transpose()
        .map_err(|error| anyhow!("invalid field list: {error}"))
        .context("failed to parse --fields")
        .map(|fields| fields.unwrap_or_else(|| OutputField::DEFAULT_SELECTION.to_vec()))
}

fn parse_options(args: &ExtractArgs) -> Result<ExtractOptions> {
    let pages = args
        .pages
        .as_deref()
        .map(PageSelection::from_str)
        .transpose()
        .map_err(|error| anyhow!("invalid page selection: {error}"))
        .context("failed to parse --pages")?;

    let column_mode = ColumnMode::from_str(&args.columns)
        .map_err(|error| anyhow!(error))
        .context("failed to parse --columns")?;

    let mut inference = match &args.config {
        Some(path) => InferenceConfig::from_json_file(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => InferenceConfig::default(),
    };
    if let Some(max_cols) = args.max_cols {
        inference.max_cols = max_cols;
    }

    let options = ExtractOptions {
        pages,
        scale: args.scale,
        column_mode,
        row_mode: if args.relaxed_rows {
            RowMode::Relaxed
        } else {
            RowMode::Standard
        },
        auto_build: !args.no_auto_build,
        smart_mode: !args.no_smart,
        structured: args.structured,
        fields: parse_fields(args.fields.as_deref())?,
        dedupe: args.dedupe,
        delimiter: parse_delimiter(args.delimiter)?,
        no_page: args.no_page,
        no_table: args.no_table,
        inference,
    };
    options.validate().context("invalid extraction options")?;
    Ok(options)
}

fn log_report(report: &ExtractionReport, verbose: bool) {
    for failure in &report.page_failures {
        eprintln!("warning: page {} skipped: {}", failure.page, failure.message);
    }
    if report.warnings.is_empty() {
        return;
    }

    eprintln!("warning: {} issue(s) detected", report.warnings.len());
    if verbose {
        for warning in &report.warnings {
            eprintln!(
                "  - {:?} page={:?} table={:?} count={:?}: {}",
                warning.code, warning.page, warning.table_index, warning.count, warning.message
            );
        }
    }
}

fn export_with<S: GlyphSource>(
    source: S,
    args: &ExtractArgs,
    options: ExtractOptions,
) -> Result<(ExportTable, ExtractionReport)> {
    let guides = match &args.guides {
        Some(path) => DocumentGuides::from_json_file(path)
            .with_context(|| format!("failed to load guides '{}'", path.display()))?,
        None => DocumentGuides::default(),
    };
    let ordering = match &args.order {
        Some(path) if path.exists() => OrderingStore::from_json_file(path)
            .with_context(|| format!("failed to load order file '{}'", path.display()))?,
        _ => OrderingStore::new(),
    };

    let mut session = ExtractionSession::new(source, options)?
        .with_guides(guides)
        .with_ordering(ordering);
    let exported = session.export()?;

    if let Some(path) = &args.order {
        session
            .ordering()
            .save_json_file(path)
            .with_context(|| format!("failed to write order file '{}'", path.display()))?;
    }
    Ok(exported)
}

fn is_glyph_dump(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn run_extract(args: &ExtractArgs) -> Result<ExtractionReport> {
    let options = parse_options(args)?;
    let delimiter = options.delimiter;
    let exported = if is_glyph_dump(&args.input) {
        let dump = GlyphDump::from_json_file(&args.input)
            .with_context(|| format!("failed to read glyph dump '{}'", args.input.display()))?;
        export_with(dump, args, options)
    } else {
        let pdf = PdfGlyphSource::open(&args.input)
            .with_context(|| format!("failed to open pdf '{}'", args.input.display()))?;
        export_with(pdf, args, options)
    };
    let (table, report) = exported
        .with_context(|| format!("failed to extract tables from '{}'", args.input.display()))?;

    write_csv(&args.output, &table, delimiter)
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;
    Ok(report)
}

fn run_parse(args: &ParseArgs) -> Result<usize> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read '{}'", args.input.display()))?;
    let fields = parse_fields(args.fields.as_deref())?;
    let table = parse_text_rows(&text, &fields, args.dedupe);
    write_csv(&args.output, &table, parse_delimiter(args.delimiter)?)
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;
    Ok(table.row_count)
}

fn run_guides(args: &GuidesArgs) -> Result<usize> {
    let guides = DocumentGuides::from_json_file(&args.guides)
        .with_context(|| format!("failed to load guides '{}'", args.guides.display()))?;
    let table = guides_to_rows(&args.document, &guides);
    write_csv(&args.output, &table, b',')
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;
    Ok(table.row_count)
}

fn exit_for_rows(row_count: usize) -> ExitCode {
    if row_count > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn fail(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {error:#}");
    ExitCode::from(1)
}

fn main() -> ExitCode {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("glyph_grid=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args = std::env::args()
        .map(|arg| match arg.as_str() {
            "-nopage" => "--nopage".to_string(),
            "-notable" => "--notable".to_string(),
            _ => arg,
        })
        .collect::<Vec<_>>();
    let cli = Cli::parse_from(args);
    match cli.command {
        Commands::Extract(args) => match run_extract(&args) {
            Ok(report) => {
                log_report(&report, args.verbose);
                exit_for_rows(report.row_count)
            }
            Err(error) => fail(&error),
        },
        Commands::Parse(args) => run_parse(&args).map_or_else(|error| fail(&error), exit_for_rows),
        Commands::Guides(args) => {
            run_guides(&args).map_or_else(|error| fail(&error), exit_for_rows)
        }
    }
}
