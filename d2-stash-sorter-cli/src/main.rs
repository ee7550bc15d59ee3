use anyhow::{ensure, Context, Result};
use argh::FromArgs;
use d2_stash_sorter::diagnostics::Diagnostics;
use d2_stash_sorter::items;
use d2_stash_sorter::layout;
use d2_stash_sorter::policy::{self, LayoutScript};
use d2_stash_sorter::schema::{Record, Value};
use d2_stash_sorter::stash::{self, Stash};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(FromArgs, PartialEq, Debug)]
/// Reorganizes Diablo II stash files.
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Command {
    Parse(ParseCommand),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "parse")]
/// Parses a stash file, verifies the round-trip, sorts its items and
/// writes the result back out.
struct ParseCommand {
    /// path to the stash file (.sss or .d2x)
    #[argh(positional)]
    filename: PathBuf,

    /// raise log verbosity to debug
    #[argh(switch)]
    debug: bool,

    /// back the input up and overwrite it in place
    #[argh(switch)]
    patch: bool,

    /// log per-phase timings
    #[argh(switch)]
    profile: bool,

    /// YAML layout script to use instead of the built-in one
    #[argh(option)]
    layout: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli: Cli = argh::from_env();
    match cli.command {
        Command::Parse(command) => {
            init_logging(command.debug);
            run_parse(command)
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_parse(command: ParseCommand) -> Result<()> {
    let started = Instant::now();
    let mut diags = Diagnostics::default();

    let bytes = std::fs::read(&command.filename)
        .with_context(|| format!("reading {}", command.filename.display()))?;
    info!("Read {} bytes from {}", bytes.len(), command.filename.display());
    let read_done = Instant::now();

    let mut stash = Stash::decode(&bytes, &mut diags).context("decoding stash")?;
    let decode_done = Instant::now();

    let reencoded = stash.encode().context("re-encoding stash")?;
    ensure!(
        reencoded == bytes,
        "round-trip mismatch: re-encoded output differs from the input, refusing to continue"
    );
    info!("Round-trip verified ({} bytes)", bytes.len());
    let verify_done = Instant::now();

    show_stash(&stash, &mut diags);

    let script = match &command.layout {
        Some(path) => LayoutScript::load_from_file(path)
            .with_context(|| format!("loading layout script {}", path.display()))?,
        None => policy::default_script().clone(),
    };
    let resolved = script.resolve().context("resolving layout script")?;
    let pages = layout::arrange(stash.pages(), &resolved, &mut diags).context("arranging items")?;
    stash.replace_pages(pages);
    let layout_done = Instant::now();

    info!("After sorting:");
    show_stash(&stash, &mut diags);

    let output = stash.encode().context("encoding sorted stash")?;
    let encode_done = Instant::now();

    if command.patch {
        let backup = backup_path(&command.filename)?;
        if let Some(parent) = backup.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::copy(&command.filename, &backup)
            .with_context(|| format!("backing up to {}", backup.display()))?;
        info!("Backed up original to {}", backup.display());
        std::fs::write(&command.filename, &output)
            .with_context(|| format!("overwriting {}", command.filename.display()))?;
        info!("Patched {} in place", command.filename.display());
    } else {
        let scratch = std::env::temp_dir().join("d2-stash-sorter.d2x");
        std::fs::write(&scratch, &output)
            .with_context(|| format!("writing {}", scratch.display()))?;
        info!("Wrote sorted stash to {}", scratch.display());
    }
    let write_done = Instant::now();

    report_diagnostics(&diags);

    if command.profile {
        info!(
            "Timings: read {:?}, decode {:?}, verify {:?}, layout {:?}, encode {:?}, write {:?}",
            read_done - started,
            decode_done - read_done,
            verify_done - decode_done,
            layout_done - verify_done,
            encode_done - layout_done,
            write_done - encode_done,
        );
    }

    Ok(())
}

fn report_diagnostics(diags: &Diagnostics) {
    let missing: Vec<&str> = diags.missing_item_types().collect();
    if !missing.is_empty() {
        warn!("Missing item types: {missing:?}");
    }
    let unknown: Vec<(u16, u64)> = diags.unknown_property_ids().collect();
    if !unknown.is_empty() {
        warn!("Unknown property ids (id, count): {unknown:?}");
    }
}

fn backup_path(filename: &Path) -> Result<PathBuf> {
    let stem = filename
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stash".to_string());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?
        .as_secs();
    let name = match filename.extension() {
        Some(ext) => format!("{stem}-{timestamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{timestamp}"),
    };
    Ok(PathBuf::from("backups").join(name))
}

fn show_stash(stash: &Stash, diags: &mut Diagnostics) {
    let page_count = stash.page_count();
    info!("Has {page_count} pages");
    for (page_no, page) in stash.pages().iter().enumerate() {
        let Ok(page) = page.as_record("page") else {
            continue;
        };
        let item_count = page
            .get("item_count")
            .and_then(|v| v.as_int("item_count").ok())
            .unwrap_or(0);
        info!("  Page {}/{page_count}: {item_count} items", page_no + 1);

        let mut wrappers: Vec<&Record> = match page.get("items") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|item| item.as_record("item").ok())
                .collect(),
            _ => continue,
        };
        wrappers.sort_by_key(|w| {
            let (x, y) = stash::item_position(w).unwrap_or((0, 0));
            (y, x)
        });

        for (item_no, wrapper) in wrappers.iter().enumerate() {
            show_item(item_no, wrappers.len(), wrapper, diags);
        }
    }
}

fn show_item(item_no: usize, total: usize, wrapper: &Record, diags: &mut Diagnostics) {
    let code = stash::item_type_code(wrapper).unwrap_or("????");
    let info = items::info_or_placeholder(code, diags);
    let (x, y) = stash::item_position(wrapper).unwrap_or((0, 0));
    info!(
        "    Item {}/{}: [{x},{y}] {} = {} ({})",
        item_no + 1,
        total,
        info.code,
        info.name,
        info.size_label()
    );

    let gems = stash::item_gems(wrapper);
    if !gems.is_empty() {
        info!("      Has {} gems", gems.len());
        for gem in gems {
            if let Ok(gem) = gem.as_record("gem") {
                if let Some(Value::Str(gem_code)) = gem.get("item_type") {
                    let gem_info = items::info_or_placeholder(gem_code, diags);
                    info!("        {} = {}", gem_info.code, gem_info.name);
                }
            }
        }
    }

    for line in property_lines(wrapper) {
        debug!("      {line}");
    }
}

fn property_lines(wrapper: &Record) -> Vec<String> {
    let Ok(data) = stash::item_data(wrapper) else {
        return Vec::new();
    };
    let Some(Value::Record(specific)) = data.get("specific_info") else {
        return Vec::new();
    };
    let Some(Value::Props(list)) = specific.get("properties") else {
        return Vec::new();
    };
    list.properties
        .iter()
        .map(|p| humanize_classes(&p.as_game_str()))
        .collect()
}

/// Class-skill properties render as `Class<N>`; substitute the class
/// name when the id is known.
fn humanize_classes(line: &str) -> String {
    let mut out = line.to_string();
    for id in 0.. {
        let Some(name) = items::class_name(id) else {
            break;
        };
        out = out.replace(&format!("Class<{id}>"), name);
    }
    out
}
