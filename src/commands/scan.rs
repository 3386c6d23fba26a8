//! Scanning commands: scan (one pass), watch (loop), detect (preview)

use chrono::Local;
use colored::Colorize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use repricer::config::{ConfigStore, FileStore};
use repricer::detect::CurrencyDetector;
use repricer::dom::Document;
use repricer::error::{RepricerError, Result};
use repricer::extract::extract_text;
use repricer::watch::{Backoff, PassReport, ScanContext, ScanLoop, Trigger};

use crate::utils::{default_output, format_wait, truncate_str};

/// Rewrite the prices in a file once
pub fn cmd_scan(file: &Path, output: Option<PathBuf>, json: bool) -> Result<()> {
    let store = FileStore::open_default()?;
    let mut doc = load_document(file)?;
    let mut ctx = ScanContext::new();

    let report = ctx.run_pass(&mut doc, &store);

    if json {
        let matches: Vec<_> = ctx
            .cache()
            .all()
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "node": entry.node.0,
                    "amount": entry.amount,
                    "converter": entry.converter.label(),
                    "text": extract_text(&doc, entry.node),
                })
            })
            .collect();
        let output = serde_json::json!({
            "file": file.display().to_string(),
            "report": report,
            "matches": matches,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match output {
        Some(path) => {
            std::fs::write(&path, doc.to_html())?;
            eprintln!("{}", summarize(&report).green());
            for entry in ctx.cache().all() {
                eprintln!(
                    "  {} -> {}",
                    format!("{:.2}", entry.amount).dimmed(),
                    truncate_str(&extract_text(&doc, entry.node), 40)
                );
            }
            eprintln!("  Wrote {}", path.display());
        }
        None => {
            println!("{}", doc.to_html());
            eprintln!("{}", summarize(&report).dimmed());
        }
    }

    Ok(())
}

/// Keep rewriting a file until Ctrl+C
pub fn cmd_watch(file: &Path, output: Option<PathBuf>, max_passes: Option<usize>) -> Result<()> {
    let store = FileStore::open_default()?;
    let settings = store.load().unwrap_or_else(|e| {
        eprintln!("  {} {} (using defaults)", "settings:".yellow(), e);
        Default::default()
    });

    let mut doc = load_document(file)?;
    let output = output.unwrap_or_else(|| default_output(file));
    let mut ctx = ScanContext::new();

    let mut scan_loop = ScanLoop::new(Backoff::from_settings(&settings.backoff)).follow_settings();
    if let Some(max) = max_passes {
        scan_loop = scan_loop.with_max_passes(max);
    }

    // Settings changes and Enter on stdin both request a re-run
    store.subscribe(scan_loop.trigger_sender())?;
    let rerun = scan_loop.trigger_sender();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() || rerun.send(Trigger::Rerun).is_err() {
                break;
            }
        }
    });

    let shutdown = scan_loop.shutdown_flag();
    ctrlc::set_handler(move || {
        println!("\n\nShutting down...");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| RepricerError::ConfigError(format!("Failed to set Ctrl+C handler: {}", e)))?;

    println!(
        "\n{} {} -> {}",
        "Watching".cyan().bold(),
        file.display(),
        output.display()
    );
    println!(
        "  Re-scanning every {} growing to {}",
        format_wait(scan_loop.backoff().current()),
        format_wait(scan_loop.backoff().max())
    );
    println!("Press {} to re-run, {} to stop\n", "Enter".yellow(), "Ctrl+C".yellow());

    let mut count = 0;
    let passes = scan_loop.run(&mut ctx, &mut doc, &store, |doc, report| {
        count += 1;
        let cause = match report.trigger {
            None => "scheduled".dimmed(),
            Some(Trigger::ConfigChanged) => "settings changed".blue(),
            Some(Trigger::Rerun) => "re-run".blue(),
        };
        println!(
            "[{}] pass {} ({}) {}",
            Local::now().format("%H:%M:%S"),
            count,
            cause,
            summarize(report)
        );
        if report.rendered > 0 || count == 1 {
            if let Err(e) = std::fs::write(&output, doc.to_html()) {
                println!("  {}: {}", "write error".red(), e);
            }
        }
    });

    println!("Stopped after {} passes.", passes);
    Ok(())
}

/// Show what the detector sees in a piece of text
pub fn cmd_detect(text: &str, symbol: Option<String>, json: bool) -> Result<()> {
    let settings = FileStore::open_default()?.load().unwrap_or_default();
    let symbol = symbol.unwrap_or_else(|| settings.currency_symbol.clone());
    let detector = CurrencyDetector::new(&symbol)?;
    let detection = detector.detect_text(text);
    let accepted = detection.is_some_and(|d| d.proportion >= settings.threshold);

    if json {
        let output = serde_json::json!({
            "text": text,
            "symbol": symbol,
            "detection": detection,
            "threshold": settings.threshold,
            "accepted": accepted,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match detection {
        Some(d) => {
            println!("  Amount:     {}", d.amount);
            println!("  Proportion: {:.2} (threshold {:.2})", d.proportion, settings.threshold);
            if accepted {
                println!("  {}", "Would be replaced".green());
            } else {
                println!("  {}", "Too much other text; children would be searched instead".yellow());
            }
        }
        None => println!("  {}", "No amount found".dimmed()),
    }

    Ok(())
}

fn load_document(file: &Path) -> Result<Document> {
    let html = std::fs::read_to_string(file).map_err(|e| {
        RepricerError::DocumentError(format!("{}: {}", file.display(), e))
    })?;
    let doc = Document::parse_html(&html);
    tracing::debug!(file = %file.display(), nodes = doc.node_count(), "document loaded");
    Ok(doc)
}

fn summarize(report: &PassReport) -> String {
    format!(
        "found {}, new {}, rewritten {}{}",
        report.found,
        report.inserted,
        report.rendered,
        if report.do_replace { "" } else { " (plain)" }
    )
}
