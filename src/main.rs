mod app;
mod cli;
mod conversation;
mod db;
mod dispatch;
mod entities;
mod error;
mod jobs;
mod model;
mod transport;
mod util;

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Timelike, Utc};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::dispatch::Dispatcher;
use crate::error::BotError;
use crate::transport::{AdminList, Event, OutboundMessage, Outbox};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    if let Err(err) = run(cli).await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout is reserved for outbound message JSON.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), BotError> {
    let tz = FixedOffset::east_opt(cli.utc_offset * 60).ok_or_else(|| {
        BotError::InvalidInput(format!(
            "utc offset of {} minutes is out of range",
            cli.utc_offset
        ))
    })?;

    db::ensure_parent_dir(&cli.database)?;
    let conn = db::connect(&cli.database).await?;
    db::ensure_schema(&conn).await?;
    let app = App::new(conn, tz);

    match cli.command {
        Command::Job { name } => {
            let job = jobs::find(&name)
                .ok_or_else(|| BotError::InvalidInput(format!("unknown job '{name}'")))?;
            let (outbox, rx) = Outbox::channel();
            let writer = spawn_writer(rx);
            jobs::run_job(&app, &outbox, job.kind).await?;
            drop(outbox);
            let _ = writer.await;
            Ok(())
        }
        Command::Run { no_scheduler } => {
            let (outbox, rx) = Outbox::channel();
            let writer = spawn_writer(rx);
            let admins = AdminList::new(cli.admins, cli.everyone_admin);
            let dispatcher = Arc::new(Dispatcher::new(app.clone(), outbox.clone(), admins));

            let scheduler = if no_scheduler {
                None
            } else {
                Some(tokio::spawn(scheduler_loop(
                    app,
                    outbox.clone(),
                    Arc::clone(&dispatcher),
                    tz,
                )))
            };
            drop(outbox);

            info!(everyone_admin = cli.everyone_admin, "reading events from stdin");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(line) {
                    Ok(event) => dispatcher.handle_event(event).await,
                    Err(err) => warn!(error = %err, "skipping malformed event line"),
                }
            }

            info!("stdin closed, shutting down");
            if let Some(handle) = scheduler {
                handle.abort();
            }
            drop(dispatcher);
            let _ = writer.await;
            Ok(())
        }
    }
}

/// Serializes outbound messages to stdout, one JSON object per line.
fn spawn_writer(mut rx: UnboundedReceiver<OutboundMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(mut line) => {
                    line.push('\n');
                    if stdout.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(err) => error!(error = %err, "failed to encode outbound message"),
            }
        }
    })
}

/// Fires each registered job once per local day at its scheduled time, and
/// sweeps abandoned conversations on the same tick. Jobs already past
/// their time at startup wait for the next day.
async fn scheduler_loop(
    app: App,
    outbox: Outbox,
    dispatcher: Arc<Dispatcher<AdminList>>,
    tz: FixedOffset,
) {
    let startup = Utc::now().with_timezone(&tz);
    let mut last_fired: Vec<Option<NaiveDate>> = jobs::JOBS
        .iter()
        .map(|job| {
            if minute_of_day(startup.hour(), startup.minute()) >= minute_of_day(job.hour, job.minute)
            {
                Some(startup.date_naive())
            } else {
                None
            }
        })
        .collect();

    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        dispatcher.sweep_conversations();

        let now = Utc::now().with_timezone(&tz);
        let today = now.date_naive();
        for (fired, job) in last_fired.iter_mut().zip(jobs::JOBS) {
            if minute_of_day(now.hour(), now.minute()) < minute_of_day(job.hour, job.minute)
                || *fired == Some(today)
            {
                continue;
            }
            *fired = Some(today);
            if let Err(err) = jobs::run_job(&app, &outbox, job.kind).await {
                error!(job = job.name, error = %err, "job run failed");
            }
        }
    }
}

fn minute_of_day(hour: u32, minute: u32) -> u32 {
    hour * 60 + minute
}
