use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use exquizite_client::{ClientConfig, Identity, SetsClient};
use handoff::{
    FileStorage, MemoryBackend, MigrationOutcome, RemoteBackend, Session,
    remote::{DEFAULT_NATIVE_LANGUAGE, DEFAULT_TARGET_LANGUAGE},
    supabase::SupabaseBackend,
};
use wordset_utils::{
    GameMode, WordPair,
    share::{ShareOptions, share_message, web_share_url},
    validate_words,
};

const SESSION_FILE: &str = "session.json";
const GUEST_DIR: &str = "guest";

/// Manage word sets as a guest or with an account
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Data directory (defaults to $EXQUIZITE_DATA_DIR or ./.exquizite)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Continue as the guest on this device, creating one if needed
    Guest {
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign in to an account; guest sets on this device are migrated
    Login {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        anonymous: bool,
    },
    /// Forget the account session
    Logout,
    /// Retry a migration that did not finish
    Migrate,
    /// List word sets, newest first
    List,
    /// Create a word set from `word=translation` pairs
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = DEFAULT_TARGET_LANGUAGE)]
        target: String,
        #[arg(long, default_value = DEFAULT_NATIVE_LANGUAGE)]
        native: String,
        #[arg(value_parser = parse_pair, num_args = 1..)]
        words: Vec<WordPair>,
    },
    /// Delete a word set
    Delete { id: String },
    /// Record a finished practice game
    Practice {
        id: String,
        mode: GameMode,
        #[arg(long)]
        score: Option<f64>,
    },
    /// Practice counts per set and game mode
    Stats,
    /// Create (or reuse) a share link for a set
    Share {
        id: String,
        #[arg(long)]
        expires_in_days: Option<u32>,
    },
    /// Show a shared set
    Resolve { code: String },
    /// Copy a shared set into your account
    Copy {
        code: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Deactivate a set's share links
    Revoke { id: String },
}

impl Command {
    fn needs_remote(&self) -> bool {
        matches!(
            self,
            Command::Login { .. }
                | Command::Migrate
                | Command::Share { .. }
                | Command::Resolve { .. }
                | Command::Copy { .. }
                | Command::Revoke { .. }
        )
    }
}

fn parse_pair(input: &str) -> Result<WordPair, String> {
    let (word, translation) = input
        .split_once('=')
        .ok_or_else(|| format!("expected word=translation, got `{input}`"))?;
    WordPair::new(word, translation).map_err(|e| e.to_string())
}

fn load_session(data_dir: &Path) -> Result<Option<Session>> {
    let path = data_dir.join(SESSION_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let session = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(session))
}

fn save_session(data_dir: &Path, session: &Session) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    let path = data_dir.join(SESSION_FILE);
    fs::write(&path, serde_json::to_string_pretty(session)?)
        .with_context(|| format!("writing {}", path.display()))
}

fn clear_session(data_dir: &Path) -> Result<()> {
    let path = data_dir.join(SESSION_FILE);
    if path.exists() {
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

fn print_outcome(outcome: &MigrationOutcome) {
    match outcome {
        MigrationOutcome::AlreadyDone => println!("Guest data was already migrated."),
        MigrationOutcome::NothingToMigrate => println!("No guest data to migrate."),
        MigrationOutcome::AlreadyRunning => println!("A migration is already running."),
        MigrationOutcome::Completed(report) => {
            println!("Migrated {} sets.", report.migrated.len());
        }
        MigrationOutcome::Partial(report) => {
            println!(
                "Migrated {} sets, {} failed. Run `exquizite migrate` to try again.",
                report.migrated.len(),
                report.failed.len()
            );
            for failed in &report.failed {
                println!("  {}: {}", failed.name, failed.error);
            }
        }
    }
}

/// Restores whoever was active in the previous invocation.
async fn restore_identity<B: RemoteBackend + Clone>(
    client: &SetsClient<FileStorage, B>,
    data_dir: &Path,
) -> Result<()> {
    if let Some(session) = load_session(data_dir)? {
        if let Some(outcome) = client.set_identity(Identity::Account(session)).await? {
            print_outcome(&outcome);
        }
    } else if client.local().get_user().await?.is_some() {
        client.sign_in_as_guest(None).await?;
    }
    Ok(())
}

async fn run<B: RemoteBackend + Clone>(
    client: SetsClient<FileStorage, B>,
    data_dir: &Path,
    command: Command,
) -> Result<()> {
    restore_identity(&client, data_dir).await?;

    match command {
        Command::Guest { name } => {
            clear_session(data_dir)?;
            client.sign_out();
            let guest = client.sign_in_as_guest(name.as_deref()).await?;
            println!("Guest {} ({})", guest.name, guest.id);
        }
        Command::Login {
            user_id,
            token,
            anonymous,
        } => {
            let session = Session {
                is_anonymous: anonymous,
                ..Session::new(user_id, token)
            };
            save_session(data_dir, &session)?;
            match client.set_identity(Identity::Account(session)).await? {
                Some(outcome) => print_outcome(&outcome),
                None => println!("Signed in."),
            }
        }
        Command::Logout => {
            clear_session(data_dir)?;
            client.sign_out();
            println!("Signed out.");
        }
        Command::Migrate => print_outcome(&client.retry_migration().await?),
        Command::List => {
            let sets = client.store()?.list_sets().await?;
            if sets.is_empty() {
                println!("No word sets.");
            }
            for set in sets {
                println!(
                    "{}  {}  ({} -> {}, {} words)",
                    set.id,
                    set.name,
                    set.native_language,
                    set.target_language,
                    set.words.len()
                );
            }
        }
        Command::Create {
            name,
            target,
            native,
            words,
        } => {
            validate_words(&words)?;
            let set = client
                .store()?
                .create_set(&name, words, &target, &native)
                .await?;
            println!("Created {} ({})", set.name, set.id);
        }
        Command::Delete { id } => {
            client.store()?.delete_set(&id).await?;
            println!("Deleted {id}");
        }
        Command::Practice { id, mode, score } => {
            client
                .store()?
                .record_practice_session(&id, mode, score)
                .await?;
            println!("Recorded a {mode} game for {id}");
        }
        Command::Stats => {
            let stats = client.store()?.practice_stats().await?;
            if stats.is_empty() {
                println!("No practice recorded.");
            }
            for (set_id, stats) in stats {
                println!("{set_id}: {} games", stats.total_count);
                for (mode, count) in stats.by_mode {
                    println!("  {mode}: {count}");
                }
            }
        }
        Command::Share {
            id,
            expires_in_days,
        } => {
            let store = client.store()?;
            let set = store
                .get_set_by_id(&id)
                .await?
                .with_context(|| format!("no set with id {id}"))?;
            let options = ShareOptions {
                expires_in_days,
                ..ShareOptions::default()
            };
            let share = store.create_share_link(&id, options).await?;
            println!("{}", share.share_url);
            println!("{}", web_share_url(&share.share_code));
            println!(
                "{}",
                share_message(
                    &set.name,
                    &web_share_url(&share.share_code),
                    set.words.len()
                )
            );
        }
        Command::Resolve { code } => {
            let Some(details) = client.resolve_share_link(&code).await else {
                bail!("share link `{code}` not found or no longer active");
            };
            println!(
                "{} by {} ({} -> {}, {} words)",
                details.name,
                details.author.name,
                details.native_language,
                details.target_language,
                details.word_count
            );
            for pair in details.words {
                println!("  {} = {}", pair.word, pair.translation);
            }
        }
        Command::Copy { code, name } => {
            let set = client
                .store()?
                .copy_shared_set(&code, name.as_deref())
                .await?;
            println!("Copied into {} ({})", set.name, set.id);
        }
        Command::Revoke { id } => {
            client.store()?.revoke_share_link(&id).await?;
            println!("Share links for {id} deactivated");
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let storage = FileStorage::open(config.data_dir.join(GUEST_DIR))
        .with_context(|| format!("opening {}", config.data_dir.display()))?;

    match config.supabase {
        Some(supabase) => {
            let client = SetsClient::new(storage, SupabaseBackend::new(supabase))
                .with_retry_policy(config.retry);
            run(client, &config.data_dir, args.command).await
        }
        None => {
            let signing_out = matches!(args.command, Command::Guest { .. } | Command::Logout);
            if signing_out {
                clear_session(&config.data_dir)?;
            }
            if args.command.needs_remote() || load_session(&config.data_dir)?.is_some() {
                bail!("SUPABASE_URL and SUPABASE_ANON_KEY must be set to use an account");
            }
            // Guest mode never reaches the backend.
            let client = SetsClient::new(storage, MemoryBackend::new());
            run(client, &config.data_dir, args.command).await
        }
    }
}
