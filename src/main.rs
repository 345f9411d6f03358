use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use stint::analytics;
use stint::auth::{AuthOutcome, Authenticator, LocalAuth};
use stint::clock::{Clock, SystemClock};
use stint::config::{load_config, save_config, Config};
use stint::domain::{status_badge, HistoryRange, SessionId, TaskId, WorkSession};
use stint::format::{format_clock, format_clock_opt, format_duration, format_time_of_day};
use stint::notifications::Notifier;
use stint::persistence::{auth_file, config_file, ensure_data_dir, init_local_data_dir};
use stint::sessions::SessionTracker;
use stint::tasks::TaskManager;
use stint::{open_backend, App};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "stint")]
#[command(about = "Task stopwatch and work-session tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a local .stint directory in the current directory
    Init,
    /// Create an account and sign in
    Signup {
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in to an existing account
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out
    Logout,
    /// Request a password reset
    ResetPassword { email: String },
    /// Add a task
    Add { name: String },
    /// Rename a task
    Rename { id: String, name: String },
    /// Delete a task
    Delete { id: String },
    /// Start (or resume) a task, stopping whichever task is running
    Start { id: String },
    /// Stop a running task, keeping its time
    Stop { id: String },
    /// Record the current run of a task as an attempt
    Complete { id: String },
    /// Run a completed task again from zero
    Restart { id: String },
    /// List tasks
    List,
    /// Show task analytics
    Stats,
    /// Start a work session
    CheckIn,
    /// End the active work session
    CheckOut {
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Show today's work sessions
    Today,
    /// Show completed work sessions
    History {
        /// today, week, month or all
        #[arg(short, long, default_value = "all")]
        filter: HistoryRange,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete one completed work session
    DeleteSession { id: String },
    /// Delete every completed work session in a range
    Purge {
        /// today, week, month or all
        #[arg(short, long)]
        range: HistoryRange,
    },
    /// Keep ticking and show the running timers until Ctrl-C
    Watch,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("STINT_LOG").unwrap_or_else(|_| EnvFilter::new("stint=info,warn"));
    let format = env::var("STINT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        let data_dir = init_local_data_dir()?;
        save_config(config_file(&data_dir), &Config::default())?;
        println!("Initialized stint directory: {}", data_dir.display());
        println!();
        println!("Stint will now use this local directory for tasks and sessions.");
        println!("Run 'stint signup <email> --password <password>' to get started.");
        return Ok(());
    }

    let data_dir = ensure_data_dir()?;
    let auth = LocalAuth::open(auth_file(&data_dir))?;

    match &cli.command {
        Commands::Signup { email, password } => {
            return report_auth("Signed up", auth.sign_up(email, password).await)
        }
        Commands::Login { email, password } => {
            return report_auth("Signed in", auth.sign_in(email, password).await)
        }
        Commands::Logout => return report_auth("Signed out", auth.sign_out().await),
        Commands::ResetPassword { email } => {
            return report_auth("Password reset requested", auth.reset_password(email).await)
        }
        _ => {}
    }

    let Some(user) = auth.current_user() else {
        bail!("Not signed in. Run 'stint login <email> --password <password>' first.");
    };

    let config = load_config(config_file(&data_dir))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = open_backend(&config, &data_dir, clock.clone())
        .with_context(|| format!("Failed to open store in {}", data_dir.display()))?;
    tracing::debug!(dir = %data_dir.display(), backend = %config.backend, "opened backend");

    let mut app = App::new(config, user, backends, clock);
    let result = match app.load().await {
        Ok(()) => run(&mut app, cli.command).await,
        Err(err) => Err(err.into()),
    };
    app.shutdown().await;
    print_notifications(app.notifier());

    match result {
        Ok(()) => Ok(()),
        // Operation failures were already shown as notifications
        Err(err) if err.downcast_ref::<stint::Error>().is_some() => std::process::exit(1),
        Err(err) => Err(err),
    }
}

async fn run(app: &mut App, command: Commands) -> Result<()> {
    match command {
        Commands::Add { name } => {
            app.tasks().lock().await.add(&name).await?;
        }
        Commands::Rename { id, name } => {
            let mut tasks = app.tasks().lock().await;
            let id = resolve_task(&tasks, &id)?;
            tasks.rename(&id, &name).await?;
        }
        Commands::Delete { id } => {
            let mut tasks = app.tasks().lock().await;
            let id = resolve_task(&tasks, &id)?;
            tasks.delete(&id).await?;
        }
        Commands::Start { id } => {
            let mut tasks = app.tasks().lock().await;
            let id = resolve_task(&tasks, &id)?;
            tasks.start(&id).await?;
        }
        Commands::Stop { id } => {
            let mut tasks = app.tasks().lock().await;
            let id = resolve_task(&tasks, &id)?;
            tasks.stop(&id).await?;
        }
        Commands::Complete { id } => {
            let mut tasks = app.tasks().lock().await;
            let id = resolve_task(&tasks, &id)?;
            tasks.complete(&id).await?;
        }
        Commands::Restart { id } => {
            let mut tasks = app.tasks().lock().await;
            let id = resolve_task(&tasks, &id)?;
            tasks.restart(&id).await?;
        }
        Commands::List => print_tasks(&*app.tasks().lock().await),
        Commands::Stats => {
            print_stats(&*app.tasks().lock().await);
            let sessions = app.sessions().lock().await;
            let stats = sessions.stats();
            println!();
            println!("Work sessions ({})", sessions.filter());
            println!("  Sessions:      {}", stats.count);
            println!("  Total time:    {}", format_duration(stats.total_time));
            println!("  Average:       {}", format_duration(stats.average));
        }
        Commands::CheckIn => app.sessions().lock().await.check_in().await?,
        Commands::CheckOut { reason } => {
            app.sessions()
                .lock()
                .await
                .check_out(reason.as_deref())
                .await?
        }
        Commands::Today => print_today(&*app.sessions().lock().await),
        Commands::History { filter, limit } => {
            let mut sessions = app.sessions().lock().await;
            let limit = limit.unwrap_or(app.config().history_limit);
            sessions.fetch_history(filter, limit).await?;
            print_history(&sessions);
        }
        Commands::DeleteSession { id } => {
            let mut sessions = app.sessions().lock().await;
            let id = resolve_session(&sessions, &id)?;
            sessions.delete_session(&id).await?;
        }
        Commands::Purge { range } => {
            app.sessions()
                .lock()
                .await
                .delete_sessions_in_range(range)
                .await?;
        }
        Commands::Watch => watch(app).await?,
        Commands::Init
        | Commands::Signup { .. }
        | Commands::Login { .. }
        | Commands::Logout
        | Commands::ResetPassword { .. } => {}
    }
    Ok(())
}

async fn watch(app: &mut App) -> Result<()> {
    app.start_scheduler();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                let line = watch_line(&*app.tasks().lock().await, &*app.sessions().lock().await);
                print!("\r\x1b[2K{}", line);
                stdout.flush()?;
                // Alerts raised by the ticks show up as they happen
                for notification in app.notifier().snapshot() {
                    app.notifier().dismiss(notification.id);
                    print!("\r\x1b[2K");
                    print_notification(&notification);
                }
            }
        }
    }
    println!();
    Ok(())
}

fn watch_line(tasks: &TaskManager, sessions: &SessionTracker) -> String {
    let task = match tasks.running() {
        Some(task) => format!(
            "{} {} (best {})",
            task.name,
            format_clock(task.current_time),
            format_clock_opt(task.best_time)
        ),
        None => "no task running".to_string(),
    };
    let session = if sessions.is_checked_in() {
        format!("checked in {}", format_clock(sessions.session_duration()))
    } else {
        "checked out".to_string()
    };
    format!("{}  |  {}", task, session)
}

fn print_tasks(tasks: &TaskManager) {
    if tasks.tasks().is_empty() {
        println!("No tasks yet. Add one with 'stint add <name>'.");
        return;
    }
    for task in tasks.tasks() {
        println!(
            "{:<8}  {:<12} {:>8}  best {:>8}  {:>3} attempts  {}",
            short_id(task.id.as_str()),
            status_badge(task),
            format_clock(task.current_time),
            format_clock_opt(task.best_time),
            task.attempts.len(),
            task.name
        );
    }
}

fn print_stats(tasks: &TaskManager) {
    let stats = tasks.stats();
    let report = analytics::summarize(tasks.tasks());

    println!("Tasks");
    println!("  Total:         {}", stats.total);
    println!(
        "  Completed:     {} ({}%)",
        stats.completed, report.summary.completion_rate
    );
    println!("  Running:       {}", stats.running);
    println!("  Idle:          {}", report.status.idle);
    println!("  Attempts:      {}", report.summary.total_attempts);
    println!("  Total time:    {}", format_duration(stats.total_time));
    println!(
        "  Avg / attempt: {}",
        format_duration(report.summary.avg_time_per_attempt)
    );

    if !report.time_per_task.is_empty() {
        println!();
        println!("Most time");
        for entry in &report.time_per_task {
            println!(
                "  {:<24} {:>10}  best {}",
                entry.name,
                format_duration(entry.total_time),
                format_clock_opt(entry.best_time)
            );
        }
    }

    if !report.improvers.is_empty() {
        println!();
        println!("Most improved");
        for entry in &report.improvers {
            println!(
                "  {:<24} {:>4}%  over {} attempts",
                entry.name, entry.improvement, entry.attempts
            );
        }
    }
}

fn print_today(sessions: &SessionTracker) {
    for session in sessions.today() {
        print_session(session, sessions);
    }
    println!(
        "Total today: {}",
        format_duration(sessions.total_time_today())
    );
}

fn print_history(sessions: &SessionTracker) {
    if sessions.history().is_empty() {
        println!("No completed sessions ({}).", sessions.filter());
        return;
    }
    for session in sessions.history() {
        print_session(session, sessions);
    }
    let stats = sessions.stats();
    println!(
        "{} sessions, {} total, {} average",
        stats.count,
        format_duration(stats.total_time),
        format_duration(stats.average)
    );
}

fn print_session(session: &WorkSession, sessions: &SessionTracker) {
    let duration = if session.is_active() {
        format!("{} (active)", format_clock(sessions.session_duration()))
    } else {
        format_clock(session.duration.or(session.span()).unwrap_or_default())
    };
    println!(
        "{:<8}  {}  {} - {}  {:>10}  {}",
        short_id(session.id.as_str()),
        session.check_in.with_timezone(&chrono::Local).format("%Y-%m-%d"),
        format_time_of_day(Some(session.check_in)),
        format_time_of_day(session.check_out),
        duration,
        session.reason.as_deref().unwrap_or("")
    );
}

fn print_notifications(notifier: &Notifier) {
    for notification in notifier.snapshot() {
        print_notification(&notification);
    }
}

fn print_notification(notification: &stint::notifications::Notification) {
    println!(
        "[{}] {}: {}",
        notification.kind.symbol(),
        notification.title,
        notification.message
    );
}

fn report_auth(done: &str, outcome: AuthOutcome) -> Result<()> {
    match outcome {
        AuthOutcome { success: true, .. } => {
            println!("{}.", done);
            Ok(())
        }
        AuthOutcome { error, .. } => {
            bail!(error.unwrap_or_else(|| "Authentication failed".to_string()))
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Resolve a full id or a unique prefix of one
fn resolve_prefix<'a, I>(kind: &str, ids: I, prefix: &str) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let ids: Vec<&str> = ids.into_iter().collect();
    if let Some(exact) = ids.iter().find(|id| **id == prefix) {
        return Ok(exact.to_string());
    }
    let matches: Vec<&&str> = ids.iter().filter(|id| id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [only] => Ok(only.to_string()),
        [] => bail!("No {} matches '{}'", kind, prefix),
        _ => bail!("'{}' matches {} {}s; use more characters", prefix, matches.len(), kind),
    }
}

fn resolve_task(tasks: &TaskManager, prefix: &str) -> Result<TaskId> {
    let ids = tasks.tasks().iter().map(|t| t.id.as_str());
    resolve_prefix("task", ids, prefix).map(TaskId::from)
}

fn resolve_session(sessions: &SessionTracker, prefix: &str) -> Result<SessionId> {
    let ids = sessions
        .today()
        .iter()
        .chain(sessions.history())
        .map(|s| s.id.as_str());
    let mut unique: Vec<&str> = ids.collect();
    unique.sort_unstable();
    unique.dedup();
    resolve_prefix("session", unique, prefix).map(SessionId::from)
}

