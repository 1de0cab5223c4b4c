//! romcart command-line tool
//!
//! Detect and install patches, grow images, manage backups and place raw
//! records from the shell.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use romcart::{
    Address, ByteRange, PatchRegistry, PatchStatus, PointerRef, RomSession, SessionBuilder,
    SessionConfig, Window, GROWTH_STEP,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "romcart")]
#[command(about = "Transactional editing of GBA cartridge images", version)]
struct Args {
    /// Session configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra patch catalog (TOML), added to the built-in one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the detected state of every known patch
    Detect { rom: PathBuf },

    /// Install a patch
    Apply {
        rom: PathBuf,
        key: String,
        /// Skip the first-write confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Grow the image
    Expand {
        rom: PathBuf,
        /// Bytes to add (default one growth step)
        #[arg(long, value_parser = parse_u32)]
        by: Option<u32>,
        #[arg(short, long)]
        yes: bool,
    },

    /// Refresh the backup copy of the image
    Backup { rom: PathBuf },

    /// Overwrite the image with its backup copy
    Restore { rom: PathBuf },

    /// Place a record and point a field at it
    Save {
        rom: PathBuf,
        /// Address of the pointer field
        #[arg(long, value_parser = parse_address)]
        pointer: Address,
        /// File holding the record bytes
        #[arg(long)]
        data: PathBuf,
        /// Old record range to erase, as START:LEN
        #[arg(long, value_parser = parse_range)]
        old: Vec<ByteRange>,
        #[arg(short, long)]
        yes: bool,
    },

    /// List the patches in the catalog
    Patches,
}

/// Parse a decimal or 0x-prefixed hex integer
fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid number '{}': {}", s, e))
}

/// Absolute address, or a file offset when below the origin
fn parse_address(s: &str) -> Result<Address, String> {
    let value = parse_u32(s)?;
    if value < romcart::ORIGIN {
        Ok(Address::from_offset(value as usize))
    } else {
        Ok(Address(value))
    }
}

fn parse_range(s: &str) -> Result<ByteRange, String> {
    let (start, len) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid range '{}'. Expected START:LEN", s))?;
    Ok(ByteRange::new(parse_address(start)?, parse_u32(len)? as usize))
}

fn ask(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn load_registry(args: &Args) -> Result<PatchRegistry> {
    let mut registry = PatchRegistry::builtin()?;
    if let Some(path) = &args.catalog {
        registry
            .extend_from_file(path)
            .with_context(|| format!("loading catalog {}", path.display()))?;
    }
    Ok(registry)
}

fn open(args: &Args, rom: &Path, yes: bool) -> Result<RomSession> {
    let builder = SessionBuilder::new()
        .config(load_config(args)?)
        .registry(load_registry(args)?);
    let builder = if yes {
        builder.confirm(|_: &str| true)
    } else {
        builder.confirm(ask)
    };
    builder
        .open(rom)
        .with_context(|| format!("opening {}", rom.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("romcart=info".parse()?))
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Detect { rom } => {
            let session = open(&args, rom, false)?;
            for (key, status) in session.patch_states().iter() {
                let name = session
                    .registry()
                    .get(key)
                    .map(|e| e.descriptor.name.as_str())
                    .unwrap_or("");
                println!("{:<16} {:<14} {}", key, status, name);
            }
        }
        Command::Apply { rom, key, yes } => {
            let mut session = open(&args, rom, *yes)?;
            session.try_apply_patch(key)?;
            println!("{}: {}", key, PatchStatus::Applied);
            session.close()?;
        }
        Command::Expand { rom, by, yes } => {
            let mut session = open(&args, rom, *yes)?;
            let new_size = session.expand(by.unwrap_or(GROWTH_STEP))?;
            println!("New size: {:#x}", new_size);
            session.close()?;
        }
        Command::Backup { rom } => {
            let mut session = open(&args, rom, false)?;
            let metadata = session.backup()?;
            println!(
                "Backup: {} bytes, sha256 {}",
                metadata.size, metadata.sha256
            );
            println!("Directory: {}", session.recovery_dir().display());
            session.close()?;
        }
        Command::Restore { rom } => {
            let mut session = open(&args, rom, false)?;
            session.restore()?;
            println!("Restored {}", rom.display());
            session.close()?;
        }
        Command::Save {
            rom,
            pointer,
            data,
            old,
            yes,
        } => {
            let bytes = std::fs::read(data)
                .with_context(|| format!("reading {}", data.display()))?;
            let mut session = open(&args, rom, *yes)?;
            let result = session.save_record(old, &bytes, &[PointerRef(*pointer)], Window::image())?;
            match result.address() {
                Some(address) => println!("Placed {} bytes at {}", bytes.len(), address),
                None => println!("Empty record, pointer set to {:#x}", result.encode()),
            }
            session.close()?;
        }
        Command::Patches => {
            let registry = load_registry(&args)?;
            if registry.is_empty() {
                bail!("no patches in catalog");
            }
            for descriptor in registry.descriptors() {
                println!("{:<16} {}", descriptor.key, descriptor.name);
                if !descriptor.description.is_empty() {
                    println!("{:<16} {}", "", descriptor.description);
                }
                for required in &descriptor.requires {
                    println!("{:<16} requires {}", "", required);
                }
            }
        }
    }

    info!("Done");
    Ok(())
}
