// tablediff command line: reconcile two SQL dumps into a foreign-key safe
// delta script, or apply the delta to a SQLite database.

use clap::{CommandFactory, Parser};
use indicatif::ProgressBar;
use rusqlite::Connection;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::thread;
use std::time::Instant;
use tablediff::catalog::DumpCatalog;
use tablediff::progress::{basename, ProgressManager};
use tablediff::sqlite::load_rows;
use tablediff::{
    logger, BoxError, DiffMode, DiffSummary, DiffTable, Key, MultiTableDiff, Row, ScriptEmitter,
    SqliteExecutor, StaticRows, TableChangeHandler, TableDescriptor,
};
use tracing::{debug, info};

// Command-line flags and positional arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable debug logging (disables progress bars).
    #[arg(long)]
    debug: bool,

    /// Emit only inserts for every row of the new dump.
    #[arg(long, conflicts_with = "truncate")]
    populate: bool,

    /// Emit only deletes for every row of the old dump.
    #[arg(long)]
    truncate: bool,

    /// Apply the delta to this SQLite database instead of writing a script.
    /// The database holds the old state; its rows replace the old dump's.
    #[arg(long, value_name = "SQLITE_DB")]
    apply: Option<String>,

    /// Finish a stalled reconciliation without foreign key ordering.
    #[arg(long)]
    continue_on_stall: bool,

    /// Old dump file path.
    old_dump: String,

    /// New dump file path.
    new_dump: String,

    /// Output delta SQL file (optional). If omitted, prints to stdout.
    output: Option<String>,

    /// Write the run summary as JSON to this file.
    #[arg(long, value_name = "PATH")]
    summary_json: Option<String>,
}

impl Args {
    fn mode(&self) -> DiffMode {
        if self.populate {
            DiffMode::Populate
        } else if self.truncate {
            DiffMode::Truncate
        } else {
            DiffMode::Compare
        }
    }
}

// Statement counts reported next to the summary.
#[derive(Default)]
struct Output {
    statements: usize,
    commented: usize,
}

fn main() -> Result<(), BoxError> {
    let wall_start = Instant::now();
    if std::env::args().len() == 1 {
        Args::command().print_help()?;
        eprintln!();
        std::process::exit(1);
    }
    let args = Args::parse();

    logger::init(args.debug);

    debug!("main: Starting table reconciliation");
    debug!("main: Old file: {}", args.old_dump);
    debug!("main: New file: {}", args.new_dump);
    if let Some(out) = &args.output {
        debug!("main: Delta file: {}", out);
    }

    // Progress bars are disabled in debug mode to avoid mangled output.
    let progress = ProgressManager::new(!logger::is_debug());

    // Parse old and new dumps in parallel.
    let parse_start = Instant::now();
    let old_handle = thread::spawn({
        let path = args.old_dump.clone();
        let progress = progress.clone();
        move || DumpCatalog::load(&path, &progress)
    });
    let new_handle = thread::spawn({
        let path = args.new_dump.clone();
        let progress = progress.clone();
        move || DumpCatalog::load(&path, &progress)
    });
    let old_catalog = old_handle
        .join()
        .map_err(|_| "old dump thread panicked")??;
    let new_catalog = new_handle
        .join()
        .map_err(|_| "new dump thread panicked")??;
    debug!(
        "Timing: dump parsing took {:?} ({} old rows, {} new rows)",
        parse_start.elapsed(),
        old_catalog.row_count(),
        new_catalog.row_count()
    );

    let mode = args.mode();
    let (summary, output) = match &args.apply {
        Some(db) => apply_to_sqlite(&args, db, mode, &old_catalog, &new_catalog, &progress)?,
        None => {
            let diff = build_diff(mode, old_catalog.diff_tables(), new_catalog.diff_tables());
            write_script(&args, &diff, &progress)?
        }
    };

    if let Some(path) = args.summary_json.as_ref() {
        let report = serde_json::json!({
            "mode": mode,
            "old_dump": args.old_dump,
            "new_dump": args.new_dump,
            "applied_to": args.apply,
            "summary": summary,
            "statements": output.statements,
            "commented_statements": output.commented,
            "wall_ms": wall_start.elapsed().as_millis() as u64,
        });
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
    }

    print_summary(&summary)?;
    debug!("main: Reconciliation complete in {:?}", wall_start.elapsed());
    Ok(())
}

fn build_diff<'a>(
    mode: DiffMode,
    old: Vec<DiffTable<'a>>,
    new: Vec<DiffTable<'a>>,
) -> MultiTableDiff<'a> {
    match mode {
        DiffMode::Compare => MultiTableDiff::compare(old, new),
        DiffMode::Populate => MultiTableDiff::populate(new),
        DiffMode::Truncate => MultiTableDiff::truncate(old),
    }
}

fn write_script(
    args: &Args,
    diff: &MultiTableDiff<'_>,
    progress: &ProgressManager,
) -> Result<(DiffSummary, Output), BoxError> {
    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    let mut emitter = ScriptEmitter::new(out).allow_postmortem(args.continue_on_stall);
    emitter.write_header(&format!(
        "Delta from {} to {}",
        basename(&args.old_dump),
        basename(&args.new_dump)
    ))?;

    let summary = {
        let mut counting = CountingHandler::new(&mut emitter, progress);
        let summary = diff.run(&mut counting)?;
        counting.finish();
        summary
    };

    emitter.write_footer()?;
    emitter.flush()?;
    let output = Output {
        statements: emitter.statements(),
        commented: emitter.commented_statements(),
    };
    Ok((summary, output))
}

fn apply_to_sqlite(
    args: &Args,
    db: &str,
    mode: DiffMode,
    old_catalog: &DumpCatalog,
    new_catalog: &DumpCatalog,
    progress: &ProgressManager,
) -> Result<(DiffSummary, Output), BoxError> {
    let mut conn = Connection::open(db)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // The database is the old side; populate starts from whatever it holds.
    let live: Vec<StaticRows> = old_catalog
        .tables()
        .iter()
        .map(|t| load_rows(&conn, t).map(StaticRows))
        .collect::<rusqlite::Result<_>>()?;
    let old_tables: Vec<DiffTable<'_>> = old_catalog
        .tables()
        .iter()
        .zip(&live)
        .map(|(descriptor, rows)| DiffTable::new(descriptor, rows))
        .collect();
    let diff = build_diff(mode, old_tables, new_catalog.diff_tables());
    info!(database = db, "applying delta");

    let mut exec = SqliteExecutor::begin(&mut conn)?.allow_postmortem(args.continue_on_stall);
    let result = {
        let mut counting = CountingHandler::new(&mut exec, progress);
        let result = diff.run(&mut counting);
        counting.finish();
        result
    };
    // Dropping the executor on error rolls the transaction back.
    let summary = result?;
    let output = Output {
        statements: exec.executed(),
        commented: 0,
    };
    exec.commit()?;
    Ok((summary, output))
}

// Print summary block.
fn print_summary(summary: &DiffSummary) -> io::Result<()> {
    let sep = "=".repeat(60);
    let mut stderr = io::stderr();
    writeln!(stderr, "\n{}\nSUMMARY\n{}", sep, sep)?;
    writeln!(stderr, "Tables:   {}", summary.tables)?;
    writeln!(stderr, "Inserts:  {}", summary.insert_count)?;
    writeln!(stderr, "Updates:  {}", summary.update_count)?;
    writeln!(stderr, "Deletes:  {}", summary.delete_count)?;
    writeln!(stderr, "Total:    {}", summary.total())?;
    if summary.postmortem {
        writeln!(
            stderr,
            "Unordered: {} (foreign key cycle, review before running)",
            summary.postmortem_operations
        )?;
    }
    writeln!(stderr, "{}", sep)
}

// Forwards to another handler and ticks a spinner per operation.
struct CountingHandler<'h> {
    inner: &'h mut dyn TableChangeHandler,
    spinner: Option<ProgressBar>,
}

impl<'h> CountingHandler<'h> {
    fn new(inner: &'h mut dyn TableChangeHandler, progress: &ProgressManager) -> Self {
        Self {
            inner,
            spinner: progress.new_operation_spinner("Reconciling"),
        }
    }

    fn tick(&self) {
        if let Some(s) = &self.spinner {
            s.inc(1);
        }
    }

    fn finish(&self) {
        if let Some(s) = &self.spinner {
            s.finish();
        }
    }
}

impl TableChangeHandler for CountingHandler<'_> {
    fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<(), BoxError> {
        self.tick();
        self.inner.insert_row(table, row)
    }

    fn update_row(
        &mut self,
        table: &TableDescriptor,
        old: &Row,
        new: &Row,
    ) -> Result<(), BoxError> {
        self.tick();
        self.inner.update_row(table, old, new)
    }

    fn delete_row(&mut self, table: &TableDescriptor, key: &Key) -> Result<(), BoxError> {
        self.tick();
        self.inner.delete_row(table, key)
    }

    fn continue_after_error(&mut self) -> bool {
        self.inner.continue_after_error()
    }

    fn postmortem_started(&mut self) {
        self.inner.postmortem_started();
    }
}
