//! event_log - print the most recent structured events as JSON lines.

use anyhow::Result;
use clap::Parser;

use campus_watchtower::SqliteEventLog;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect the watchtower's structured event log")]
struct Args {
    /// Event database written by the watchtower.
    #[arg(long, env = "WATCHTOWER_DB_PATH", default_value = "watchtower_events.db")]
    db_path: String,

    /// Number of events to print, newest first.
    #[arg(short = 'n', long, default_value_t = 20)]
    limit: usize,

    /// Only print events of this type (e.g. FALL_DETECTED).
    #[arg(long = "type", value_name = "EVENT_TYPE")]
    event_type: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let log = SqliteEventLog::open(&args.db_path)?;
    log::info!("{} event(s) in {}", log.count()?, args.db_path);
    let events = match args.event_type.as_deref() {
        Some(event_type) => log.recent_of_type(event_type, args.limit)?,
        None => log.recent(args.limit)?,
    };
    if events.is_empty() {
        eprintln!("no matching events in {}", args.db_path);
        return Ok(());
    }
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}
