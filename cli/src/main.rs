//! jsync - Command-line interface for the sync engine.
//!
//! Mirrors one local directory tree onto another. Progress goes to stderr,
//! diagnostics go through `tracing`, and `--json` prints the final counters
//! on stdout for scripting.

use clap::Parser;
use jsync_engine::{
    sync, ChecksumAlgorithm, JsyncMode, LocalFileSystem, ProgressCallback, SyncOptions,
    SyncResult, TypeConflict, VirtualPath,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// jsync - Make a target directory tree match a source tree
#[derive(Parser, Debug)]
#[command(name = "jsync")]
#[command(version = "0.1.0")]
#[command(about = "Synchronize a directory tree onto another, like a minimal rsync")]
struct Args {
    /// Source file or directory
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Target directory (or file, when the source is a file)
    #[arg(value_name = "TARGET")]
    target: PathBuf,

    /// Root mapping: nest (TARGET/<source name>) or merge (TARGET itself)
    #[arg(long, value_name = "MODE", default_value = "merge")]
    mode: String,

    /// Delete target entries that do not exist in the source
    #[arg(long)]
    delete: bool,

    /// Checksum equal-size files even when their timestamps match
    #[arg(long)]
    ignore_times: bool,

    /// Replace target entries whose type (file vs directory) differs
    #[arg(long)]
    force: bool,

    /// Create missing parent directories of the target
    #[arg(long)]
    parents: bool,

    /// Skip entries matching this glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Checksum preference, comma-separated: blake3, sha256, md5, crc32
    #[arg(long, value_name = "LIST", default_value = "blake3,sha256,md5,crc32")]
    checksum: String,

    /// Print the result as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output and debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// CLI implementation of ProgressCallback for displaying sync progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let mins = secs / 60;
        let secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}.{:02}s", secs, elapsed.subsec_millis() / 10)
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_sync_started(&self, source: &VirtualPath, target: &VirtualPath) {
        eprintln!("Synchronizing...");
        eprintln!("  Source: {}", source);
        eprintln!("  Target: {}", target);
        eprintln!();
    }

    fn on_dir_entered(&self, rel: &str) {
        if self.verbose && !rel.is_empty() {
            eprintln!("  {}/", rel);
        }
    }

    fn on_file_transferred(&self, rel: &str, bytes: u64, created: bool) {
        if self.verbose {
            let marker = if created { "+" } else { "~" };
            eprintln!("{} {} ({})", marker, rel, Self::format_bytes(bytes));
        }
    }

    fn on_entry_deleted(&self, rel: &str, is_dir: bool) {
        if self.verbose {
            let suffix = if is_dir { "/" } else { "" };
            eprintln!("- {}{}", rel, suffix);
        }
    }

    fn on_conflict(&self, conflict: &TypeConflict) {
        let expected = if conflict.source_is_dir {
            "directory"
        } else {
            "file"
        };
        eprintln!(
            "! {}: source is a {}, target is not (use --force to replace)",
            conflict.path, expected
        );
    }

    fn on_sync_completed(&self, result: &SyncResult) {
        eprintln!();
        if result.is_noop() {
            eprintln!("Already up to date.");
        } else {
            eprintln!("Sync complete!");
        }
        eprintln!(
            "Files: {} created, {} updated, {} deleted",
            result.files_created, result.files_updated, result.files_deleted
        );
        eprintln!(
            "Directories: {} created, {} deleted",
            result.dirs_created, result.dirs_deleted
        );
        eprintln!(
            "Checksums computed: {}, timestamps fixed: {}",
            result.checksums_computed, result.stats_updated
        );
        eprintln!("Bytes transferred: {}", Self::format_bytes(result.bytes_transferred));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if !result.conflicts.is_empty() {
            eprintln!();
            eprintln!("{} type conflict(s) left unresolved", result.conflicts.len());
        }
    }
}

/// Parse and validate command-line arguments, then run the sync
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let outcome = run_cli(&args);
    if let Ok(result) = &outcome {
        if args.json {
            match serde_json::to_string_pretty(result) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: failed to serialize result: {}", e),
            }
        }
    }

    std::process::exit(exit_code(&outcome));
}

/// Install the stderr log subscriber. `RUST_LOG` wins unless `--verbose`.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// 0 on success, 1 when type conflicts were left in place, 2 on error.
fn exit_code(outcome: &Result<SyncResult, String>) -> i32 {
    match outcome {
        Ok(result) if result.conflicts.is_empty() => 0,
        Ok(_) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    }
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<SyncResult, String> {
    // Parse mode
    let mode = match JsyncMode::from_str(&args.mode) {
        Some(mode) => mode,
        None => {
            return Err(format!(
                "Invalid mode '{}'. Must be 'nest' or 'merge'",
                args.mode
            ))
        }
    };

    // Parse checksum preference
    let preferred_checksums = match ChecksumAlgorithm::parse_list(&args.checksum) {
        Some(list) => list,
        None => {
            return Err(format!(
                "Invalid checksum list '{}'. Use a comma-separated subset of 'blake3', 'sha256', 'md5', 'crc32'",
                args.checksum
            ))
        }
    };

    let source = path_str(&args.source)?;
    let target = path_str(&args.target)?;

    let options = SyncOptions {
        mode,
        delete: args.delete,
        ignore_times: args.ignore_times,
        force: args.force,
        parents: args.parents,
        exclude: args.exclude.clone(),
        preferred_checksums,
        cancel: None,
    };

    // Create progress callback
    let progress = CliProgress::new(args.verbose);
    let local = LocalFileSystem::new();

    sync(&local, &source, &local, &target, &options, Some(&progress))
        .map_err(|e| format!("Sync failed: {}", e))
}

/// Engine paths are `/`-separated UTF-8 strings.
fn path_str(path: &Path) -> Result<String, String> {
    match path.to_str() {
        Some(s) if cfg!(windows) => Ok(s.replace('\\', "/")),
        Some(s) => Ok(s.to_string()),
        None => Err(format!("Path is not valid UTF-8: {}", path.display())),
    }
}
