use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use clinimon_core::{
    format_hms, Config, Database, Event, HttpSessionRepository, MonitorOptions,
    MonitorableSession, SessionController, SessionMonitor, SessionRepository, SessionSource,
    StaticClientDirectory, SystemClock,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a new session, or resume the stopped one when no client is given
    Start {
        /// Client ID
        #[arg(long, requires = "session_type")]
        client: Option<String>,
        /// Session type (e.g. "therapy", "assessment")
        #[arg(long = "type")]
        session_type: Option<String>,
        /// Appointment title
        #[arg(long)]
        title: Option<String>,
        /// Where the session comes from: calendar or manual
        #[arg(long, default_value = "manual")]
        source: SessionSource,
        /// Session ID (required for calendar sessions)
        #[arg(long)]
        id: Option<String>,
    },
    /// Pause the running timer and flush progress
    Pause,
    /// Zero the timer (discards a session that never started)
    Reset,
    /// Close the session
    Finish {
        /// Session notes
        #[arg(long, default_value = "")]
        notes: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show the active session
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep the timer resident and print every change
    Watch {
        /// Stop after this many seconds
        #[arg(long, default_value = "60")]
        seconds: u64,
    },
}

/// Monitor wired to the local database, reconciled from the persisted
/// envelope.
struct Context {
    db: Arc<Database>,
    controller: SessionController,
    sync_wait: Duration,
}

impl Context {
    fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let db = Arc::new(Database::open()?);
        let repository: Arc<dyn SessionRepository> = match &config.remote.base_url {
            Some(url) => Arc::new(HttpSessionRepository::new(
                url,
                Duration::from_secs(config.remote.timeout_secs),
            )?),
            None => db.clone(),
        };
        let monitor = SessionMonitor::new(
            db.clone(),
            repository,
            Arc::new(SystemClock),
            MonitorOptions::from(&config),
        );
        if let Some(Event::SessionRestored {
            drift_secs,
            resumed: true,
            ..
        }) = monitor.initialize()
        {
            tracing::debug!(drift_secs, "resumed running session");
        }
        let directory =
            StaticClientDirectory::new(config.clients.iter().cloned()).with_local_totals(&db)?;
        Ok(Self {
            db,
            controller: SessionController::new(Arc::new(monitor), Arc::new(directory)),
            sync_wait: Duration::from_secs(config.remote.timeout_secs + 1),
        })
    }

    fn monitor(&self) -> &SessionMonitor {
        self.controller.monitor()
    }

    fn print_panel(&self) {
        print!("{}", self.controller.panel());
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.monitor().shutdown();
    }
}

pub async fn run(action: SessionAction) -> CliResult {
    let mut ctx = Context::open()?;

    match action {
        SessionAction::Start {
            client,
            session_type,
            title,
            source,
            id,
        } => {
            if let Some(client) = client {
                if ctx.monitor().view().session.is_some() {
                    return Err("a session is already active; finish or reset it first".into());
                }
                let session_type = session_type.unwrap_or_default();
                let session = build_session(source, id, client, session_type, title)?;
                ctx.db.upsert_session(&session)?;
                ctx.monitor().set_active_session(Some(session))?;
            }
            match ctx.controller.start() {
                Some(_) => ctx.print_panel(),
                None if ctx.monitor().view().session.is_none() => {
                    return Err("no active session; pass --client and --type".into());
                }
                None => println!("timer is already running"),
            }
        }
        SessionAction::Pause => {
            let mut events = ctx.monitor().subscribe();
            match ctx.controller.pause() {
                Some(Event::TimerPaused { session_id, .. }) => {
                    wait_for_sync(&mut events, &session_id, ctx.sync_wait).await;
                    ctx.print_panel();
                }
                _ => println!("timer is not running"),
            }
        }
        SessionAction::Reset => match ctx.controller.reset() {
            Some(Event::SessionDiscarded { session_id, .. }) => {
                println!("session {session_id} discarded");
            }
            Some(_) => ctx.print_panel(),
            None => println!("nothing to reset"),
        },
        SessionAction::Finish { notes, yes } => {
            let Some(confirmation) = ctx.controller.request_finish() else {
                println!("nothing to finish");
                return Ok(());
            };
            if !yes && !confirm(&confirmation.to_string())? {
                ctx.controller.cancel_finish();
                return Err("finish cancelled".into());
            }
            if let Some(Event::SessionFinished {
                session_id,
                elapsed_secs,
                ..
            }) = ctx.controller.confirm_finish(notes).await?
            {
                println!(
                    "session {session_id} finished after {}",
                    format_hms(elapsed_secs)
                );
            }
        }
        SessionAction::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&ctx.controller.panel())?);
            } else {
                ctx.print_panel();
            }
        }
        SessionAction::Watch { seconds } => {
            let mut view = ctx.monitor().watch();
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);
            ctx.print_panel();
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    changed = view.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = view.borrow_and_update().clone();
                        let panel = ctx.controller.panel_for(&snapshot);
                        let state = format!("{:?}", panel.state).to_lowercase();
                        println!("{} [{state}]", panel.elapsed);
                    }
                }
            }
        }
    }
    Ok(())
}

fn build_session(
    source: SessionSource,
    id: Option<String>,
    client: String,
    session_type: String,
    title: Option<String>,
) -> Result<MonitorableSession, Box<dyn std::error::Error>> {
    let session = match source {
        SessionSource::Calendar => {
            let id = id.ok_or("calendar sessions need --id")?;
            MonitorableSession::from_calendar(id, client, session_type, title.unwrap_or_default())?
        }
        SessionSource::Manual => {
            let mut session = MonitorableSession::manual(client, session_type)?;
            if let Some(id) = id {
                session.id = id;
            }
            session.title = title.unwrap_or_default();
            session
        }
    };
    Ok(session)
}

/// Wait for the pause flush so the process does not exit with it in flight.
async fn wait_for_sync(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    session_id: &str,
    limit: Duration,
) {
    let outcome = tokio::time::timeout(limit, async {
        while let Ok(event) = events.recv().await {
            match event {
                Event::SyncCompleted { session_id: id, .. } if id == session_id => return true,
                Event::SyncFailed { session_id: id, message, .. } if id == session_id => {
                    eprintln!("warning: progress not synced: {message}");
                    return false;
                }
                _ => {}
            }
        }
        false
    })
    .await;
    if outcome.is_err() {
        eprintln!("warning: progress sync still pending");
    }
}

fn confirm(prompt: &str) -> std::io::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
