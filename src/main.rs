use anyhow::Result;
use clap::{Parser, Subcommand};
use examwatch::config::MonitorConfig;
use examwatch::monitor::{Monitor, MonitorStatus};
use examwatch::scheduler::RefreshOutcome;
use examwatch::view::DerivedView;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "examwatch",
    about = "Live exam-session monitoring console",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and redraw the live table
    Watch {
        /// Status source URL (overrides config)
        #[arg(long)]
        url: Option<String>,
    },

    /// Fetch once and print the current view
    Snapshot {
        /// Status source URL (overrides config)
        #[arg(long)]
        url: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run the monitor behind a JSON API
    Serve {
        /// Status source URL (overrides config)
        #[arg(long)]
        url: Option<String>,

        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = MonitorConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { url } => {
            apply_url(&mut cfg, url);
            examwatch::telemetry::init(&cfg.logging)?;
            run_watch(&cfg).await?;
        }
        Commands::Snapshot { url, json } => {
            apply_url(&mut cfg, url);
            examwatch::telemetry::init(&cfg.logging)?;
            run_snapshot(&cfg, json).await?;
        }
        Commands::Serve { url, bind } => {
            apply_url(&mut cfg, url);
            if let Some(bind) = bind {
                cfg.api.listen_address = bind;
            }
            examwatch::telemetry::init(&cfg.logging)?;
            tracing::info!(bind = %cfg.api.listen_address, "Starting examwatch API");
            examwatch::serve(&cfg).await?;
        }
    }

    Ok(())
}

fn apply_url(cfg: &mut MonitorConfig, url: Option<String>) {
    if let Some(url) = url {
        cfg.source.url = url;
    }
}

async fn run_watch(cfg: &MonitorConfig) -> Result<()> {
    let monitor = Monitor::from_config(cfg)?;
    monitor.start();

    let mut ticks = monitor.subscribe_ticks();
    let mut store = monitor.subscribe_store();
    let mut refreshing = monitor.subscribe_refreshing();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = ticks.changed() => if changed.is_err() { break },
            changed = store.changed() => if changed.is_err() { break },
            changed = refreshing.changed() => if changed.is_err() { break },
        }
        // Clear screen and home the cursor before each redraw.
        print!("\x1B[2J\x1B[H");
        print_view(&monitor.view(), &monitor.status());
    }

    monitor.shutdown();
    Ok(())
}

async fn run_snapshot(cfg: &MonitorConfig, json: bool) -> Result<()> {
    let monitor = Monitor::from_config(cfg)?;
    // Paused: the manual refresh below is the only fetch.
    monitor.start();
    monitor.pause();
    let outcome = monitor.refresh_now().await;
    let status = monitor.status();
    monitor.shutdown();

    if let RefreshOutcome::Failed { error } = &outcome {
        anyhow::bail!("fetch failed: {}", error);
    }
    if let Some(failure) = &status.last_error {
        anyhow::bail!("fetch failed: {}", failure.error);
    }

    let view = monitor.view();
    if json {
        let out = serde_json::json!({ "data": &*view, "meta": status });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_view(&view, &status);
    }
    Ok(())
}

fn print_view(view: &DerivedView, status: &MonitorStatus) {
    println!("\nExam Monitoring -- Live");
    println!(
        "Active: {}   Currently taking: {}   Done (last poll): {}",
        view.counts.total, view.counts.currently_taking, view.counts.recently_done
    );
    match (&status.fetched_at, &status.last_error) {
        (_, Some(failure)) => println!(
            "Status: {} | last fetch FAILED at {} ({}) -- showing previous data",
            status.phase,
            failure.at.format("%H:%M:%S"),
            failure.error
        ),
        (Some(at), None) => println!(
            "Status: {}{} | updated {}",
            status.phase,
            if status.refreshing { " (refreshing)" } else { "" },
            at.format("%H:%M:%S")
        ),
        (None, None) => println!("Status: {} | waiting for first poll", status.phase),
    }
    println!();

    if view.rows.is_empty() {
        println!("No active exam sessions.");
        return;
    }

    println!(
        "{:<10} | {:<22} | {:<20} | {:<16} | {:<18} | Started",
        "ID", "Examinee", "Exam", "Status", "Phase"
    );
    println!(
        "{:-<10}-|-{:-<22}-|-{:-<20}-|-{:-<16}-|-{:-<18}-|-{:-<12}",
        "", "", "", "", "", ""
    );
    for row in &view.rows {
        println!(
            "{:<10} | {:<22} | {:<20} | {:<16} | {:<18} | {}",
            row.examinee_id, row.examinee_name, row.exam_title, row.status, row.phase.label, row.elapsed
        );
    }
    println!();
}
