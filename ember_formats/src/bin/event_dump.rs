use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use ember_formats::{load_common_events, Command, MapFile};

#[derive(Parser, Debug)]
#[command(about = "Dump authored event programs as indented text", version)]
struct Args {
    /// Map file (map_<id>.json) to dump
    #[arg(long, value_name = "PATH", conflicts_with = "common_events")]
    map: Option<PathBuf>,

    /// Common events file (common_events.json) to dump
    #[arg(long, value_name = "PATH")]
    common_events: Option<PathBuf>,

    /// Only dump the event with this id
    #[arg(long, value_name = "ID")]
    event: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.map.is_none() && args.common_events.is_none() {
        bail!("pass --map or --common-events");
    }

    if let Some(path) = args.map.as_ref() {
        let map = MapFile::load(path)?;
        println!("map {} \"{}\" ({} events)", map.id, map.name, map.events.len());
        for event in &map.events {
            if args.event.is_some_and(|id| id != event.id) {
                continue;
            }
            println!(
                "  event {} \"{}\" trigger={:?} ({} commands)",
                event.id,
                event.name,
                event.trigger,
                event.commands.len()
            );
            dump_commands(&event.commands);
        }
    }

    if let Some(path) = args.common_events.as_ref() {
        let events = load_common_events(path)?;
        println!("{} common events", events.len());
        for event in &events {
            if args.event.is_some_and(|id| id != event.id) {
                continue;
            }
            println!(
                "  common event {} \"{}\" trigger={:?}",
                event.id, event.name, event.trigger
            );
            dump_commands(&event.commands);
        }
    }

    Ok(())
}

fn dump_commands(commands: &[Command]) {
    for command in commands {
        let params = command
            .parameters
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "    {:indent$}[{code}] {params}",
            "",
            indent = command.indent as usize * 2,
            code = command.code,
        );
    }
}
