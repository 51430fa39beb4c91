//! Runs a parsed command line: builds the archive, runs the release steps and
//! prints a summary. Kept out of `main.rs` so the integration tests and the
//! binary share one code path.

use crate::archive;
use crate::builder::{ArchiveBuilder, BuildReport, Verdict};
use crate::cli::{self, Commands};
use crate::progress::ProgressState;
use crate::release::{self, ReleaseOutcome, ReleasePipeline};
use serde::Serialize;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(Serialize)]
struct JsonSummary<'a> {
    verdict: Verdict,
    #[serde(flatten)]
    report: &'a BuildReport,
    release: &'a ReleaseOutcome,
}

/// Public entry for running CLI logic on already-parsed arguments.
pub fn run_cli_app(args: &cli::Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match &args.command {
        Commands::Build { progress, dry_run, json, .. } => {
            let command = &args.command;
            let job = command.build_job().ok_or("not a build command")?;
            let options = command.release_options()?.unwrap_or_default();
            let pipeline = ReleasePipeline::from_options(&options);

            if *dry_run {
                let files = ArchiveBuilder::new().preview(&job)?;
                println!(
                    "[DRYRUN] Would zip {} → {} ({} files)",
                    job.source.display(),
                    job.output.display(),
                    files.len()
                );
                for step in pipeline.plan(&job.output) {
                    println!("[DRYRUN] {step}");
                }
                return Ok(ExitCode::SUCCESS);
            }

            let mut builder = ArchiveBuilder::new();
            if *progress {
                builder = builder.with_progress(create_cli_progress_callback("zip"));
            }
            let report = builder.build(&job)?;
            let verdict = report.verdict(job.strict);

            for failure in &report.failed_files {
                eprintln!("⚠️  Skipped {failure}");
            }

            // A strict failure stops before anything is hashed or copied.
            let outcome = if verdict == Verdict::Failure {
                ReleaseOutcome::default()
            } else {
                pipeline.run(&report.archive_path)?
            };

            if *json {
                let summary = JsonSummary { verdict, report: &report, release: &outcome };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&report, verdict, &outcome);
            }

            Ok(match verdict {
                Verdict::Failure => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
        Commands::List { archive } => {
            archive::print_listing(archive)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { archive } => {
            release::verify::verify_against_sidecar(archive)?;
            println!("✅ SHA256 OK: {}", archive.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_summary(report: &BuildReport, verdict: Verdict, outcome: &ReleaseOutcome) {
    let mb = report.total_bytes as f64 / (1024.0 * 1024.0);
    match verdict {
        Verdict::Success => println!(
            "✅ Zip completed: {} ({} files, {:.2} MB in {:.2?})",
            report.archive_path.display(),
            report.file_count,
            mb,
            report.elapsed
        ),
        Verdict::SuccessWithWarnings => println!(
            "⚠️  Zip completed with {} skipped file(s): {} ({} files, {:.2} MB in {:.2?})",
            report.failed_files.len(),
            report.archive_path.display(),
            report.file_count,
            mb,
            report.elapsed
        ),
        Verdict::Failure => {
            eprintln!(
                "❌ Strict mode: {} file(s) could not be archived; release steps skipped",
                report.failed_files.len()
            );
            return;
        }
    }

    if let Some(digest) = &outcome.digest {
        println!("✅ SHA256: {}", digest.path.display());
    }
    if let Some(signature) = &outcome.signature {
        println!("✅ GPG signature: {}", signature.display());
    }
    for copied in &outcome.copied {
        println!("✅ Copied: {}", copied.display());
    }
    if outcome.verified {
        println!("✅ Remote SHA256 verified");
    }
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_uppercase();
    let last_update = Mutex::new(Instant::now());
    let prev_len = Mutex::new(0usize);
    let done = AtomicBool::new(false);

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        // Update every 100ms to avoid terminal spam, but always show 100% completion
        let should_update = state.progress_percent >= 100.0 || {
            let mut last = last_update.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last).as_millis() >= 100 {
                *last = now;
                true
            } else {
                false
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);

        let eta = state.estimated_time_remaining().as_secs_f32();
        let eta_str = if state.progress_percent <= 0.0 || state.speed_mbps <= 0.0 {
            "--".to_string()
        } else if eta > 60.0 {
            format!("{:.1}m", eta / 60.0)
        } else {
            format!("{:.1}s", eta)
        };

        let build_status_line = |bw: usize| -> String {
            let filled = (((state.progress_percent / 100.0) * bw as f32) as usize).min(bw);
            let progress_bar = format!("[{}{}]", "█".repeat(filled), "░".repeat(bw - filled));
            let mut line = format!(
                "[{}] {} {:.1}% | {}/{} files | {:.1} MB/s | ETA: {}",
                operation,
                progress_bar,
                state.progress_percent,
                state.processed_files,
                state.total_files,
                state.speed_mbps,
                eta_str
            );
            if state.failed_files > 0 {
                line.push_str(&format!(" | {} skipped", state.failed_files));
            }
            line
        };

        // Shrink the bar until the line fits the terminal
        let mut bar_len: usize = 40;
        let mut status_line = build_status_line(bar_len);
        while status_line.chars().count() > term_width && bar_len > 10 {
            bar_len = bar_len.saturating_sub(4).max(10);
            status_line = build_status_line(bar_len);
        }

        let len = status_line.chars().count();
        {
            let mut prev = prev_len.lock().unwrap_or_else(PoisonError::into_inner);
            if *prev > len {
                status_line.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        // stderr keeps stdout clean for --json
        eprint!("\r\x1B[2K{}", status_line);
        io::stderr().flush().ok();

        if state.progress_percent >= 100.0 {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}
