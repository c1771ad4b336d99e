use anyhow::{Context, Result, bail};
use clap::Parser;
use log_window::{
    GapsEvent, IdleWait, LoadState, LogSourcesManager, ManagerEvent, PositionedMessagesProvider,
    ShiftOutcome, TimeGapsWorker,
};
use log_window_config::LogWindowConfig;
use log_window_text::TextLogProvider;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod logger;
mod output;

use cli::Cli;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LogWindowConfig::load_from(path)?,
        None => LogWindowConfig::load(),
    };
    let log_file = cli.log_file.clone().or_else(|| config.log_file.clone());
    logger::init(log_file.as_deref())?;

    log::info!("Starting log-window with {} files", cli.files.len());
    let result = run(&cli, &config);
    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}

fn run(cli: &Cli, config: &LogWindowConfig) -> Result<()> {
    let format = config.text_format()?;
    let settings = config.reader_settings();
    let timeout = settings.idle_timeout;

    let mut manager = LogSourcesManager::new(settings);
    let mut providers: Vec<Arc<dyn PositionedMessagesProvider>> = Vec::new();
    for path in &cli.files {
        let provider = TextLogProvider::open(path, format.clone())
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let provider: Arc<dyn PositionedMessagesProvider> = Arc::new(provider);
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        manager.add_source(name, provider.clone())?;
        providers.push(provider);
    }
    let events = manager.subscribe();

    manager.navigate(cli.navigation())?;
    if manager.wait_for_idle(timeout, &Default::default())? != IdleWait::Idle {
        bail!("Sources did not finish loading within {:?}", timeout);
    }

    let mut out = io::stdout().lock();
    let mut last = output::print_view(&manager, &mut out, None)?;

    for page in 0..cli.pages {
        let outcome = if cli.up {
            manager.shift_up(timeout)?
        } else {
            manager.shift_down(timeout)?
        };
        match outcome {
            ShiftOutcome::Shifted => {
                writeln!(out, "--")?;
                last = output::print_view(&manager, &mut out, None)?;
            }
            ShiftOutcome::AtBoundary => {
                log::info!("Reached the end of all files after {} pages", page);
                break;
            }
            other => {
                log::warn!("Paging stopped: {:?}", other);
                break;
            }
        }
    }

    if cli.gaps {
        print_gaps(providers, config, &mut out)?;
    }

    if cli.follow {
        follow(&mut manager, &events, &mut out, last)?;
    }
    Ok(())
}

fn print_gaps(
    providers: Vec<Arc<dyn PositionedMessagesProvider>>,
    config: &LogWindowConfig,
    out: &mut impl Write,
) -> Result<()> {
    let worker = TimeGapsWorker::spawn(providers, config.gap_settings())
        .context("Failed to start time gap scan")?;
    let event = worker
        .events()
        .recv()
        .context("Time gap scan stopped without a result")?;

    let gaps = match event {
        GapsEvent::Completed(gaps) => gaps,
        GapsEvent::TooManyGaps(gaps) => {
            writeln!(out, "more than {} time gaps, showing the first ones", gaps.len())?;
            gaps
        }
        GapsEvent::Failed(reason) => bail!("Time gap scan failed: {}", reason),
    };
    writeln!(out, "{} time gaps", gaps.len())?;
    for gap in &gaps {
        writeln!(out, "{}", output::format_gap(gap))?;
    }
    Ok(())
}

fn follow(
    manager: &mut LogSourcesManager,
    events: &crossbeam_channel::Receiver<ManagerEvent>,
    out: &mut impl Write,
    mut last: Option<output::PrintedKey>,
) -> Result<()> {
    log::info!("Following files");
    loop {
        manager.pump_events(FOLLOW_POLL_INTERVAL)?;
        while let Ok(event) = events.try_recv() {
            match event {
                ManagerEvent::ViewUpdated(_) => {
                    last = output::print_view(manager, out, last)?;
                }
                ManagerEvent::SourceStateChanged {
                    source,
                    state: LoadState::LoadError(reason),
                } => {
                    let name = manager.source_name(source).unwrap_or("?");
                    eprintln!("log-window: failed to read {}: {}", name, reason);
                }
                ManagerEvent::SourceStateChanged { .. } => {}
            }
        }
    }
}
