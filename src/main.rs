use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use serde::Serialize;

use pageflow::cli::Cli;
use pageflow::logging::init_logging;
use pageflow::panic_handler::initialize_panic_handler;
use pageflow::pipeline::{
    AutoFetcher, DeviceHints, DocumentFormat, LoadSession, PageRecord, PageSink, PageStatus,
    PdfRasterizer, PoolPlan, SessionOptions, SessionProgress, SessionStats,
};
use pageflow::settings::{Settings, load_settings};

/// Reports session progress to the log file
struct LogSink;

impl PageSink for LogSink {
    fn insert_page(&mut self, record: &PageRecord, global_index: usize) {
        debug!(
            "Page {global_index}: owner {} page {} {:?}",
            record.owner_index, record.page_in_file, record.status
        );
    }

    fn set_worker_count(&mut self, count: usize) {
        info!("Decoding with {count} execution unit(s)");
    }
}

#[derive(Serialize)]
struct PageSummary {
    global_index: usize,
    owner_index: usize,
    page_in_file: u32,
    format: Option<DocumentFormat>,
    status: PageStatus,
    code: i8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_url: Option<String>,
}

#[derive(Serialize)]
struct Summary {
    plan: PoolPlan,
    stats: SessionStats,
    pages: Vec<PageSummary>,
}

fn pdf_rasterizer(settings: &Settings) -> Box<dyn PdfRasterizer> {
    #[cfg(feature = "pdf")]
    return Box::new(pageflow::pipeline::MupdfRasterizer::with_scale(
        settings.pdf_scale,
    ));

    #[cfg(not(feature = "pdf"))]
    {
        debug!(
            "Built without PDF support; pdf_scale {} unused",
            settings.pdf_scale
        );
        pageflow::pipeline::default_rasterizer()
    }
}

fn session_options(settings: &Settings, sequential: bool) -> SessionOptions {
    let detected = DeviceHints::detect();
    SessionOptions {
        hints: DeviceHints {
            logical_cores: detected.logical_cores,
            memory_gb: settings.memory_gb,
            mobile: settings.mobile,
        },
        max_units: settings.max_units,
        force_sequential: sequential,
        events_per_poll: settings.events_per_poll,
        fetcher: Arc::new(AutoFetcher::default()),
        pdf: pdf_rasterizer(settings),
        ..SessionOptions::default()
    }
}

fn write_pages(session: &LoadSession, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut written = 0;
    for page in session.pages().iter().flatten() {
        if page.status != PageStatus::Ready {
            continue;
        }
        let Some(encoded) = page.rendered.and_then(|h| session.handles().get(h)) else {
            continue;
        };
        let path = dir.join(format!("page-{:04}.png", page.global_index + 1));
        fs::write(&path, &encoded.png)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}

fn summarize(session: &LoadSession, data_urls: bool) -> Summary {
    let pages = session
        .pages()
        .iter()
        .flatten()
        .map(|p| PageSummary {
            global_index: p.global_index,
            owner_index: p.owner_index,
            page_in_file: p.page_in_file,
            format: p.format,
            status: p.status,
            code: p.status.code(),
            data_url: (data_urls && p.status == PageStatus::Ready)
                .then(|| p.rendered.and_then(|h| session.handles().get(h)))
                .flatten()
                .map(|encoded| encoded.to_data_url()),
        })
        .collect();
    Summary {
        plan: session.plan(),
        stats: session.stats(),
        pages,
    }
}

fn print_text_summary(summary: &Summary) {
    let plan = &summary.plan;
    println!(
        "{} unit(s){}",
        plan.unit_count,
        if plan.sequential { ", sequential" } else { "" }
    );
    for page in &summary.pages {
        let format = page
            .format
            .map_or_else(|| "unknown".to_string(), |f| f.to_string());
        println!(
            "{:>5}  input {:<4} page {:<4} {:<6} {:?}",
            page.global_index, page.owner_index, page.page_in_file, format, page.status
        );
    }
    let stats = &summary.stats;
    println!(
        "{} ready, {} failed, {} fallback job(s), {} recovery reroute(s)",
        stats.pages_ready, stats.pages_failed, stats.routed_fallback, stats.error_recoveries
    );
}

fn main() -> Result<()> {
    initialize_panic_handler();
    let cli = Cli::parse();

    let (mut settings, settings_error) = match load_settings(cli.config.as_deref()) {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::default(), Some(e)),
    };
    cli.apply_to(&mut settings);
    init_logging(&settings)?;
    if let Some(e) = settings_error {
        error!("{e}; using default settings");
    }

    info!("Starting pageflow");
    let inputs = cli
        .input_spec()?
        .expand()
        .context("Invalid input list")?;

    let mut session = LoadSession::start(
        inputs,
        session_options(&settings, cli.sequential),
        Box::new(LogSink),
    );
    let progress = session.run_to_completion();
    if progress != SessionProgress::Complete {
        error!("Session ended in state {progress:?}");
    }

    if let Some(dir) = &cli.out {
        let written = write_pages(&session, dir)?;
        info!("Wrote {written} page(s) to {}", dir.display());
    }

    let summary = summarize(&session, cli.data_urls);
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
        );
    } else {
        print_text_summary(&summary);
    }

    session.teardown();
    info!("Shutting down pageflow");
    Ok(())
}
