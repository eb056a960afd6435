use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use flipbook::library::scan_library;
use flipbook::panic_handler::initialize_panic_handler;
use flipbook::pdf::{
    DocumentSource, MupdfRasterizer, Navigation, NullPresenter, PageIndex, PngPresenter,
    Rasterizer, ReaderSession, save_png,
};
use flipbook::settings::{Settings, load_settings};

#[derive(Debug, Parser)]
#[command(name = "flipbook")]
#[command(version, about = "Page-turn PDF reader")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE", default_value = "flipbook.log")]
    log_file: PathBuf,

    #[arg(long, global = true, value_name = "LEVEL", default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the PDFs in a directory.
    List {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Read a PDF interactively, writing each shown page as PNG.
    Read {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value = "frames")]
        out: PathBuf,
        #[arg(long)]
        scale: Option<f32>,
        /// Page to start on
        #[arg(long)]
        page: Option<usize>,
    },
    /// Render a single page to PNG.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        page: usize,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        scale: Option<f32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_panic_handler();

    if let Err(error) = run(cli) {
        error!("{error:#}");
        eprintln!("{error:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> Result<()> {
    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("cannot create log file {}", cli.log_file.display()))?,
    )?;
    info!("Starting flipbook {}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings(cli.config.as_deref());

    match cli.command {
        Commands::List { dir, json } => run_list(&dir, json),
        Commands::Read {
            file,
            out,
            scale,
            page,
        } => run_read(&file, &out, with_scale(settings, scale), page),
        Commands::Render {
            file,
            page,
            out,
            scale,
        } => run_render(&file, page, out.as_deref(), with_scale(settings, scale)),
    }
}

fn with_scale(mut settings: Settings, scale: Option<f32>) -> Settings {
    if let Some(scale) = scale {
        settings.scale = scale;
    }
    settings.normalized()
}

fn run_list(dir: &Path, json: bool) -> Result<()> {
    let books = scan_library(dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&books)?);
        return Ok(());
    }

    if books.is_empty() {
        println!("No PDFs in {}", dir.display());
        return Ok(());
    }
    let width = books.iter().map(|b| b.title.len()).max().unwrap_or(0);
    for book in &books {
        println!("{:<width$}  {:>10}  {}", book.title, book.size, book.filename);
    }
    Ok(())
}

fn run_render(file: &Path, page: usize, out: Option<&Path>, settings: Settings) -> Result<()> {
    let timeout = settings.render_timeout();
    let mut session = ReaderSession::new(
        Arc::new(MupdfRasterizer),
        DocumentSource::new(file),
        settings,
        NullPresenter,
    );
    session.open()?;

    let page_count = session.page_count();
    let index = PageIndex::new(page)
        .filter(|p| p.within(page_count))
        .with_context(|| format!("page {page} is outside 1..={page_count}"))?;

    if index != session.current_page() {
        let outcome = match session.goto_page(page) {
            Navigation::Pending(_) => session.wait_transition(timeout),
            other => other,
        };
        if !matches!(outcome, Navigation::Completed(_)) {
            let reason = session
                .last_navigation_error()
                .map_or_else(|| format!("{outcome:?}"), ToString::to_string);
            bail!("page {page} could not be rendered: {reason}");
        }
    }

    let rendered = session
        .scheduler()
        .and_then(|s| s.cache().peek(index))
        .context("rendered page missing from cache")?;
    let out = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("page-{page:04}.png")));
    save_png(&rendered, &out).with_context(|| format!("cannot write {}", out.display()))?;
    println!(
        "{} ({}x{})",
        out.display(),
        rendered.bitmap.width,
        rendered.bitmap.height
    );
    Ok(())
}

fn run_read(file: &Path, out: &Path, settings: Settings, start: Option<usize>) -> Result<()> {
    let presenter = PngPresenter::new(out)
        .with_context(|| format!("cannot create output directory {}", out.display()))?;
    let timeout = settings.render_timeout();
    let mut session = ReaderSession::new(
        Arc::new(MupdfRasterizer),
        DocumentSource::new(file),
        settings,
        presenter,
    );

    if let Err(e) = session.open() {
        error!("Failed to open {}: {e}", file.display());
        return Err(e).context("cannot open document");
    }
    if let Some(page) = start {
        report(&mut session, page, timeout);
    }
    print_status(&session);

    let stdin = io::stdin();
    let mut prompt = io::stdout();
    loop {
        print!("> ");
        prompt.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let argument = words.next();

        match (command, argument) {
            ("n" | "next", _) => {
                let outcome = session.next_page();
                finish(&mut session, outcome, timeout);
            }
            ("p" | "prev", _) => {
                let outcome = session.previous_page();
                finish(&mut session, outcome, timeout);
            }
            ("g" | "goto", Some(page)) => match page.parse::<usize>() {
                Ok(page) => report(&mut session, page, timeout),
                Err(_) => println!("not a page number: {page}"),
            },
            ("s" | "scale", Some(scale)) => match scale.parse::<f32>() {
                Ok(scale) => {
                    let outcome = session.set_scale(scale);
                    finish(&mut session, outcome, timeout);
                }
                Err(_) => println!("not a scale: {scale}"),
            },
            ("status", _) => {}
            ("r" | "reload", _) => {
                if let Err(e) = session.reload() {
                    println!("reload failed: {e}");
                }
            }
            ("q" | "quit", _) => break,
            _ => {
                println!("commands: n, p, g N, s SCALE, status, reload, q");
                continue;
            }
        }
        print_status(&session);
    }

    session.close();
    Ok(())
}

fn report<R: Rasterizer>(
    session: &mut ReaderSession<R, PngPresenter>,
    page: usize,
    timeout: Duration,
) {
    let outcome = session.goto_page(page);
    finish(session, outcome, timeout);
}

fn finish<R: Rasterizer>(
    session: &mut ReaderSession<R, PngPresenter>,
    outcome: Navigation,
    timeout: Duration,
) {
    let outcome = match outcome {
        Navigation::Pending(_) => session.wait_transition(timeout),
        other => other,
    };
    match outcome {
        Navigation::Completed(_) => {
            session.settle(timeout);
        }
        Navigation::Pending(page) => println!("page {page} is still rendering"),
        Navigation::Rejected(reason) => println!("ignored: {reason:?}"),
        Navigation::Failed(page) => match session.last_navigation_error() {
            Some(e) => println!("page {page} failed: {e}"),
            None => println!("page {page} failed"),
        },
    }
}

fn print_status<R: Rasterizer>(session: &ReaderSession<R, PngPresenter>) {
    let frame = session
        .presenter()
        .last_written()
        .map_or_else(String::new, |p| format!("  {}", p.display()));
    println!(
        "page {}/{}  [{}]  scale {}  cached {}{frame}",
        session.current_page(),
        session.page_count(),
        session.phase(),
        session.scale(),
        session.cache_len(),
    );
}
