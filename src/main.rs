use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use tutorbook::config::TutorbookConfig;
use tutorbook::model::{Calendar, UserId};
use tutorbook::store::{Store, WalStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline maintenance for a tutorbook write-ahead log")]
struct Args {
    /// TOML config file; `TUTORBOOK__SECTION__KEY` variables override it.
    #[arg(short, long, env = "TUTORBOOK_CONFIG", default_value = "tutorbook.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay the log and print a per-tutor summary.
    Inspect {
        #[arg(long)]
        json: bool,
    },
    /// Replay the log and rewrite it with only the live state.
    Compact,
}

#[derive(Debug, Serialize)]
struct TutorSummary {
    tutor_id: UserId,
    version: u64,
    active_windows: usize,
    inactive_windows: usize,
    sessions: BTreeMap<&'static str, usize>,
}

impl TutorSummary {
    fn of(calendar: &Calendar) -> Self {
        let active_windows = calendar.active_windows().count();
        let mut sessions = BTreeMap::new();
        for s in &calendar.sessions {
            *sessions.entry(s.status.as_str()).or_insert(0) += 1;
        }
        Self {
            tutor_id: calendar.tutor_id,
            version: calendar.version,
            active_windows,
            inactive_windows: calendar.windows.len() - active_windows,
            sessions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = TutorbookConfig::load(Some(&args.config))?;

    fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .with_writer(std::io::stderr)
        .init();

    std::fs::create_dir_all(&config.storage.data_dir)?;
    let wal_path = config.storage.wal_path();
    let store = WalStore::open(&wal_path, config.storage.compact_threshold).await?;

    match args.command {
        Command::Inspect { json } => {
            let mut summaries = Vec::new();
            for tutor_id in store.tutor_ids() {
                summaries.push(TutorSummary::of(&store.load(tutor_id).await?));
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for s in &summaries {
                    let sessions: Vec<String> =
                        s.sessions.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    println!(
                        "{}  v{}  windows {}/{}  sessions [{}]",
                        s.tutor_id,
                        s.version,
                        s.active_windows,
                        s.active_windows + s.inactive_windows,
                        sessions.join(" ")
                    );
                }
            }
        }
        Command::Compact => {
            store.compact().await?;
            info!(path = %wal_path.display(), tutors = store.tutor_ids().len(), "log compacted");
        }
    }
    Ok(())
}
