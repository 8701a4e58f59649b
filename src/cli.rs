//! Command-line interface and REPL

use anyhow::Result;
use colored::Colorize;
use rustyline::DefaultEditor;

use crate::store::MappingStore;

/// Interactive operator loop over the mapping store.
pub async fn run_repl(store: MappingStore) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "saxmap console - type 'help' for commands".bold());

    loop {
        let readline = rl.readline("sax> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                if line == "exit" || line == "quit" {
                    break;
                }
                if let Err(e) = run_command(&store, line) {
                    println!("{} {}", "error:".red(), e);
                }
            }
            Err(_) => break,
        }
    }

    Ok(())
}

fn run_command(store: &MappingStore, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or("");

    match cmd {
        "help" => print_help(),
        "mask" => {
            store.request_current_mask();
            println!("current-mask query sent");
        }
        "entry" => {
            let index = parse_u8(parts.next())?;
            store.request_entry(index);
            println!("entry query sent for slot {}", index & 0x7F);
        }
        "load" => {
            let store = store.clone();
            tokio::spawn(async move { store.load_all_entries().await });
            println!("bulk load started (128 paced queries)");
        }
        "set" => {
            let mask = parse_u32(parts.next())?;
            let note = parse_u8(parts.next())?;
            store.set_mapping(mask, note);
            println!("set-mapping sent (mask {:#X}, note {})", mask, note & 0x7F);
        }
        "delete" => {
            let mask = parse_u32(parts.next())?;
            store.delete_mapping(mask);
            println!("delete-mapping sent (mask {:#X})", mask);
        }
        "show" => print_state(store),
        other => anyhow::bail!("unknown command '{}', try 'help'", other),
    }

    Ok(())
}

fn print_help() {
    println!("  mask                 query the device's current active mask");
    println!("  entry <index>        query one mapping slot");
    println!("  load                 fetch all 128 slots (paced)");
    println!("  set <mask> <note>    write a mapping (mask hex or decimal)");
    println!("  delete <mask>        remove a mapping");
    println!("  show                 print the mirrored state");
    println!("  quit                 exit");
}

fn print_state(store: &MappingStore) {
    let state = store.snapshot();

    match state.current_mask {
        Some(mask) => {
            let when = state
                .last_updated
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            println!("current mask: {} (at {})", format!("{:#09X}", mask).green(), when);
        }
        None => println!("current mask: {}", "unknown".yellow()),
    }

    let received = store.received_count();
    let loading = if state.is_loading_entries {
        " (loading)".yellow().to_string()
    } else {
        String::new()
    };
    println!("received: {}/128{}", received, loading);

    for (index, entry) in state.entries.iter().enumerate() {
        if let Some(entry) = entry {
            let used = if entry.used { "used".green() } else { "free".dimmed() };
            println!(
                "  [{:3}] {} mask={:#09X} note={}",
                index, used, entry.mask, entry.note
            );
        }
    }
}

fn parse_u8(arg: Option<&str>) -> Result<u8> {
    let arg = arg.ok_or_else(|| anyhow::anyhow!("missing argument"))?;
    parse_u32_str(arg).map(|v| v as u8)
}

fn parse_u32(arg: Option<&str>) -> Result<u32> {
    let arg = arg.ok_or_else(|| anyhow::anyhow!("missing argument"))?;
    parse_u32_str(arg)
}

fn parse_u32_str(s: &str) -> Result<u32> {
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    value.map_err(|_| anyhow::anyhow!("invalid number '{}'", s))
}
