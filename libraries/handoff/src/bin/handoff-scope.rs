use std::path::PathBuf;

use handoff::{
    FileStorage, KeyValueStorage, LocalStore,
    local::{GUEST_PRACTICE_KEY, GUEST_SETS_KEY, GUEST_USER_KEY},
};
use wordset_utils::{MAX_WORDS_PER_SET, WordSet};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <path-to-data-dir>", args[0]);
        eprintln!("\nExample: {} ./.exquizite", args[0]);
        std::process::exit(1);
    }

    let dir = PathBuf::from(&args[1]);

    if !dir.is_dir() {
        eprintln!("Error: Directory '{}' does not exist", dir.display());
        std::process::exit(1);
    }

    let storage = match FileStorage::open(&dir) {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("Error opening '{}': {e}", dir.display());
            std::process::exit(1);
        }
    };

    println!("HandoffScope - Guest Data Inspector");
    println!("===================================");
    println!("Directory: {}", dir.display());
    println!();

    inspect(storage).await;
}

/// Whether the raw record under `key` is missing, readable, or corrupt.
async fn check_record<T: serde::de::DeserializeOwned>(storage: &FileStorage, key: &str) {
    match storage.get_item(key).await {
        Ok(None) => println!("  {key}: absent"),
        Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
            Ok(_) => println!("  {key}: {} bytes, ok", raw.len()),
            Err(e) => println!("  ❌ {key}: {} bytes, UNREADABLE ({e})", raw.len()),
        },
        Err(e) => println!("  ❌ {key}: read failed ({e})"),
    }
}

async fn inspect(storage: FileStorage) {
    println!("Records:");
    println!("--------");
    check_record::<wordset_utils::GuestIdentity>(&storage, GUEST_USER_KEY).await;
    check_record::<Vec<WordSet>>(&storage, GUEST_SETS_KEY).await;
    check_record::<Vec<wordset_utils::PracticeSession>>(&storage, GUEST_PRACTICE_KEY).await;
    println!();

    let local = LocalStore::new(storage);

    println!("Guest:");
    println!("------");
    match local.get_user().await {
        Ok(Some(guest)) => {
            println!("  Id: {}", guest.id);
            println!("  Name: {}", guest.name);
            println!("  Email: {}", guest.email);
        }
        Ok(None) => println!("  No guest identity"),
        Err(e) => println!("  ❌ {e}"),
    }
    println!();

    println!("Word Sets:");
    println!("----------");
    let sets = local.list_sets().await.unwrap_or_else(|e| {
        println!("  ❌ {e}");
        Vec::new()
    });
    let stats = local.practice_stats().await.unwrap_or_default();

    if sets.is_empty() {
        println!("  No sets");
    }

    let mut has_order_problem = false;
    let mut has_time_problem = false;
    for (i, set) in sets.iter().enumerate() {
        println!("  Set {i}: {} ({})", set.name, set.id);
        println!(
            "    Languages: {} -> {}",
            set.native_language, set.target_language
        );
        println!("    Words: {}", set.words.len());
        if set.words.len() > MAX_WORDS_PER_SET {
            println!("    ⚠️  More than {MAX_WORDS_PER_SET} words");
        }
        println!("    Created: {}", set.created_at);
        println!("    Updated: {}", set.updated_at);
        if let Some(last_practiced) = set.last_practiced {
            println!("    Last practiced: {last_practiced}");
        }
        if let Some(stats) = stats.get(&set.id) {
            println!("    Practice sessions: {}", stats.total_count);
            for (mode, count) in &stats.by_mode {
                println!("      {mode}: {count}");
            }
        }

        if set.updated_at < set.created_at {
            has_time_problem = true;
            println!("    ⚠️  Updated before it was created");
        }
        if let Some(previous) = i.checked_sub(1).map(|p| &sets[p]) {
            if previous.created_at < set.created_at {
                has_order_problem = true;
                println!("    ⚠️  Newer than the set listed before it");
            }
        }
    }

    let orphaned: usize = stats
        .iter()
        .filter(|(set_id, _)| !sets.iter().any(|s| &s.id == *set_id))
        .map(|(_, s)| s.total_count as usize)
        .sum();
    if orphaned > 0 {
        println!("  Practice sessions for deleted sets: {orphaned}");
    }

    println!();
    println!("Migrations:");
    println!("-----------");
    match local.migrated_accounts().await {
        Ok(accounts) if accounts.is_empty() => println!("  None recorded"),
        Ok(accounts) => {
            for account in accounts {
                println!("  ✅ Migrated to account {account}");
            }
        }
        Err(e) => println!("  ❌ {e}"),
    }

    println!();
    println!("Summary:");
    println!("--------");
    if !has_order_problem && !has_time_problem {
        println!("  ✅ Sets are newest-first with consistent timestamps");
    }
    match local.has_any_data().await {
        Ok(true) => println!("  Guest data present, would be migrated on sign-in"),
        Ok(false) => println!("  No guest data"),
        Err(e) => println!("  ❌ {e}"),
    }
}
