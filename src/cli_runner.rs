//! Runs a parsed command line against the library and prints results.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::cli::{Args, Commands};
use crate::error::{Result, SealError};
use crate::extract::Unpacker;
use crate::pack::Packer;
use crate::progress::{ProgressState, ProgressTracker};
use crate::workers::CancelToken;

pub fn run_cli_app(args: Args) -> Result<()> {
    match &args.command {
        Commands::Pack { inputs, output, algorithm, progress, timeout_secs } => {
            let packer = Packer::new(args.resolve_config(*algorithm)?);
            let tracker = tracker_for("pack", *progress);
            let summary = packer.pack_with(inputs, output, &tracker, &cancel_token(*timeout_secs))?;
            println!(
                "Packed {} file(s), {} bytes -> {} ({} bytes, {})",
                summary.entries,
                summary.origin_bytes,
                output.display(),
                summary.container_bytes,
                summary.algorithm
            );
        }
        Commands::Unpack { container, output, entry, stdout, progress, timeout_secs } => {
            let unpacker = Unpacker::new(args.resolve_config(None)?);
            match entry {
                Some(name) if *stdout => {
                    let data = unpacker.unpack_to_memory(container, name)?;
                    let mut out = io::stdout().lock();
                    out.write_all(&data)
                        .and_then(|()| out.flush())
                        .map_err(SealError::io("<stdout>"))?;
                }
                Some(name) => {
                    let path = unpacker.unpack_entry_to_file(container, name, output)?;
                    println!("Restored {}", path.display());
                }
                None => {
                    let tracker = tracker_for("unpack", *progress);
                    let summary = unpacker.unpack_with(
                        container,
                        output,
                        &tracker,
                        &cancel_token(*timeout_secs),
                    )?;
                    println!(
                        "Restored {} file(s), {} bytes into {}",
                        summary.written.len(),
                        summary.origin_bytes,
                        output.display()
                    );
                }
            }
        }
        Commands::List { container } => {
            let info = Unpacker::new(args.resolve_config(None)?).extract_info(container)?;
            println!(
                "Container '{}' by {} ({}, {} entries):",
                info.name,
                info.author,
                info.algorithm,
                info.entries.len()
            );
            for entry in &info.entries {
                println!(
                    "- {} ({} bytes, {} stored)",
                    entry.name, entry.origin_size, entry.crypt_size
                );
            }
        }
        Commands::Work { inputs, algorithm } => {
            let packer = Packer::new(args.resolve_config(*algorithm)?);
            println!("{}", packer.work_calculate(inputs)?);
        }
    }

    Ok(())
}

fn cancel_token(timeout_secs: Option<u64>) -> CancelToken {
    match timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    }
}

fn tracker_for(operation: &str, show: bool) -> ProgressTracker {
    let mut tracker = ProgressTracker::default();
    if show {
        tracker.enable_with_callback(create_cli_progress_callback(operation));
    }
    tracker
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let label = operation.to_uppercase();
    let last_update = Mutex::new(Instant::now());
    let prev_len = Mutex::new(0usize);
    let done = AtomicBool::new(false);

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let finished = state.progress_percent >= 100.0;
        let should_update = finished || {
            let mut last = last_update.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if now.duration_since(*last) >= Duration::from_millis(100) {
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
        let eta = if finished {
            "0.0s".to_string()
        } else if state.speed_mbps > 0.0 {
            format!("{:.1}s", state.estimated_time_remaining().as_secs_f32())
        } else {
            "--".to_string()
        };

        // Shrink the bar until the line fits the terminal.
        let mut bar_width = 40usize;
        let line = loop {
            let filled = ((state.progress_percent / 100.0) * bar_width as f32) as usize;
            let filled = filled.min(bar_width);
            let line = format!(
                "[{label}] [{}{}] {:.1}% | {}/{} files | {} chunks | {:.1} MB/s | ETA: {eta}",
                "█".repeat(filled),
                "░".repeat(bar_width - filled),
                state.progress_percent,
                state.done_files,
                state.total_files,
                state.done_chunks,
                state.speed_mbps,
            );
            if line.chars().count() <= term_width || bar_width <= 10 {
                break line;
            }
            bar_width -= 5;
        };

        let mut padded = line;
        {
            let mut prev = prev_len.lock().unwrap_or_else(PoisonError::into_inner);
            let len = padded.chars().count();
            if *prev > len {
                padded.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        eprint!("\r\x1B[2K{padded}");
        io::stderr().flush().ok();

        if finished {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}
