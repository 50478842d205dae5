//! save-tool: headless save manager for the dimension save core.
//!
//! Usage:
//!   save-tool --db saves.db info
//!   save-tool --db saves.db slot 2
//!   save-tool --db saves.db import backup.txt
//!   save-tool --db saves.db --remote-db cloud.db --user alice cloud-push
//!   save-tool --db saves.db --remote-db cloud.db --user alice --ipc-mode

use anyhow::Result;
use dimsave_core::{
    clock::{Clock, SystemClock},
    cloud::{CloudReconciler, Direction, Identity, LoadCheckOutcome, Resolution, SaveCheckOutcome, SqliteRemote},
    config::SaveConfig,
    error::{MigrationError, SaveError},
    event::SaveEvent,
    session::Session,
    storage::StorageManager,
    store::SqliteStore,
    types::{SlotId, SLOT_COUNT},
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Save {
        #[serde(default)]
        manual: bool,
    },
    Export,
    ExportFile,
    Import {
        text: String,
    },
    LoadSlot {
        slot: SlotId,
    },
    HardReset,
    SaveCheck {
        #[serde(default)]
        force_modal: bool,
    },
    LoadCheck,
    ResolveConflict {
        id: String,
        overwrite: bool,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct SlotSummary {
    slot: SlotId,
    empty: bool,
    version: Option<u32>,
    name: Option<String>,
    progress: Option<f64>,
}

#[derive(serde::Serialize)]
struct ConflictSummary {
    id: String,
    direction: Direction,
    slot: SlotId,
    invalid_cloud_data: bool,
}

#[derive(serde::Serialize)]
struct UiState {
    current_slot: SlotId,
    write_protected: bool,
    last_save_time: i64,
    logged_in: bool,
    last_known_hash: Option<String>,
    slots: Vec<SlotSummary>,
    conflicts: Vec<ConflictSummary>,
    result: String,
    events: Vec<SaveEvent>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or("dimsave.db");
    let remote_db = flag_value(&args, "--remote-db").unwrap_or("dimsave-remote.db");
    let user = flag_value(&args, "--user");
    let config = match flag_value(&args, "--config") {
        Some(path) => SaveConfig::load(path)?,
        None => SaveConfig::default(),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = SqliteStore::open(db)?;
    store.migrate()?;
    let remote = SqliteRemote::open(remote_db)?;

    let storage = StorageManager::new(Box::new(store), config.clone(), clock.clone());
    let mut cloud = CloudReconciler::new(Box::new(remote), &config, clock);
    if let Some(user) = user {
        cloud.login(Identity {
            id: user.to_string(),
            display_name: Some(user.to_string()),
            email: None,
        });
    }
    let mut session = Session::new(storage, cloud);

    match session.load() {
        Ok(outcome) => log::debug!("startup load: {outcome:?}"),
        Err(SaveError::Migration(e @ MigrationError::FutureVersion { .. })) => {
            eprintln!("warning: {e}; saving is disabled for this slot");
        }
        Err(e) => return Err(e.into()),
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if ipc_mode {
        return run_ipc_loop(&mut session, &runtime);
    }

    let command = positional(&args);
    match command.first().map(String::as_str) {
        None | Some("info") => print_info(&session),
        Some("save") => println!("{:?}", session.storage.save(false, true)?),
        Some("export") => println!("{}", session.storage.export()?),
        Some("export-file") => {
            let file = session.storage.export_as_file()?;
            std::fs::write(&file.file_name, &file.contents)?;
            println!("wrote {}", file.file_name);
        }
        Some("import") => {
            let path = command
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("import needs a file path"))?;
            match session.import_file(Path::new(path))? {
                Some(outcome) => println!("{outcome:?}"),
                None => println!("importing is disabled"),
            }
        }
        Some("slot") => {
            let slot: SlotId = command
                .get(1)
                .and_then(|s| s.parse::<SlotId>().ok())
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| anyhow::anyhow!("slot needs a number from 1 to {SLOT_COUNT}"))?;
            println!("{:?}", session.load_slot(slot)?);
        }
        Some("reset") => println!("{:?}", session.hard_reset()?),
        Some("cloud-push") => {
            let outcome = runtime.block_on(session.save_check(false))?;
            println!("{}", describe_save_check(&outcome));
        }
        Some("cloud-pull") => {
            let outcome = runtime.block_on(session.load_check())?;
            println!("{}", describe_load_check(&outcome));
        }
        Some(other) => anyhow::bail!("unknown command: {other}"),
    }

    for event in session.drain_events() {
        log::info!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

fn run_ipc_loop(session: &mut Session, runtime: &Runtime) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        match handle_command(session, runtime, cmd) {
            Ok(result) => {
                let state = build_ui_state(session, result);
                writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
            }
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(session: &mut Session, runtime: &Runtime, cmd: IpcCommand) -> Result<String> {
    let result = match cmd {
        IpcCommand::GetState | IpcCommand::Quit => String::new(),
        IpcCommand::Save { manual } => format!("{:?}", session.storage.save(!manual, manual)?),
        IpcCommand::Export => session.storage.export()?,
        IpcCommand::ExportFile => {
            let file = session.storage.export_as_file()?;
            serde_json::json!({ "file_name": file.file_name, "contents": file.contents }).to_string()
        }
        IpcCommand::Import { text } => format!("{:?}", session.import(&text)?),
        IpcCommand::LoadSlot { slot } => format!("{:?}", session.load_slot(slot)?),
        IpcCommand::HardReset => format!("{:?}", session.hard_reset()?),
        IpcCommand::SaveCheck { force_modal } => {
            describe_save_check(&runtime.block_on(session.save_check(force_modal))?)
        }
        IpcCommand::LoadCheck => describe_load_check(&runtime.block_on(session.load_check())?),
        IpcCommand::ResolveConflict { id, overwrite } => {
            let id = id.parse()?;
            let resolution = if overwrite {
                Resolution::Overwrite
            } else {
                Resolution::Keep
            };
            format!(
                "{:?}",
                runtime.block_on(session.resolve_conflict(id, resolution))?
            )
        }
    };
    Ok(result)
}

fn build_ui_state(session: &mut Session, result: String) -> UiState {
    let storage = &session.storage;
    let slots = (0..SLOT_COUNT)
        .map(|slot| {
            let save = storage.slot(slot);
            SlotSummary {
                slot,
                empty: save.is_none(),
                version: save.map(|s| s.version()),
                name: save
                    .and_then(|s| s.save_file_name())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
                progress: save.and_then(|s| s.progress()).and_then(|v| v.to_number()),
            }
        })
        .collect();
    let conflicts = session
        .pending_conflicts()
        .map(|c| ConflictSummary {
            id: c.id.to_string(),
            direction: c.direction,
            slot: c.slot,
            invalid_cloud_data: c.comparison.is_none(),
        })
        .collect();

    UiState {
        current_slot: storage.current_slot(),
        write_protected: storage.is_write_protected(),
        last_save_time: storage.last_save_time(),
        logged_in: session.cloud.logged_in(),
        last_known_hash: session.cloud.record().last_known_hash.clone(),
        slots,
        conflicts,
        result,
        events: session.drain_events(),
    }
}

fn describe_save_check(outcome: &SaveCheckOutcome) -> String {
    match outcome {
        SaveCheckOutcome::Push(request) => format!("push prepared for slot {}", request.slot + 1),
        SaveCheckOutcome::Pushed(receipt) => format!("pushed slot {} ({})", receipt.slot + 1, receipt.hash),
        SaveCheckOutcome::Conflict(c) => format!("conflict {} on slot {}: {:?}", c.id, c.slot + 1, c.comparison),
        SaveCheckOutcome::InvalidCloudData(c) => format!("invalid cloud data {} on slot {}", c.id, c.slot + 1),
        SaveCheckOutcome::Skipped => "skipped".to_string(),
        SaveCheckOutcome::Discarded => "discarded".to_string(),
    }
}

fn describe_load_check(outcome: &LoadCheckOutcome) -> String {
    match outcome {
        LoadCheckOutcome::NoCloudSave => "no cloud save".to_string(),
        LoadCheckOutcome::Loaded { slot } => format!("loaded slot {} from cloud", slot + 1),
        LoadCheckOutcome::Conflict(c) => format!("conflict {} on slot {}: {:?}", c.id, c.slot + 1, c.comparison),
        LoadCheckOutcome::InvalidCloudData(c) => format!("invalid cloud data {} on slot {}", c.id, c.slot + 1),
        LoadCheckOutcome::EmptyCloudSlot { slot } => format!("cloud slot {} is empty", slot + 1),
        LoadCheckOutcome::Discarded => "discarded".to_string(),
    }
}

fn print_info(session: &Session) {
    let storage = &session.storage;
    println!("=== SAVE SLOTS ===");
    for slot in 0..SLOT_COUNT {
        let marker = if slot == storage.current_slot() { "*" } else { " " };
        match storage.slot(slot) {
            Some(save) => println!(
                " {marker} slot {}: v{} {}",
                slot + 1,
                save.version(),
                save.save_file_name().unwrap_or_default()
            ),
            None => println!(" {marker} slot {}: (empty)", slot + 1),
        }
    }
    println!("  write protected: {}", storage.is_write_protected());
    println!("  cloud login:     {}", session.cloud.logged_in());
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

/// Arguments that are neither flags nor flag values.
fn positional(args: &[String]) -> Vec<String> {
    const VALUED: [&str; 4] = ["--db", "--remote-db", "--config", "--user"];
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args.iter().skip(1) {
        if skip {
            skip = false;
        } else if VALUED.contains(&arg.as_str()) {
            skip = true;
        } else if !arg.starts_with("--") {
            out.push(arg.clone());
        }
    }
    out
}
