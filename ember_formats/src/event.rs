use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record of an authored event program: a numeric command code, the
/// lexical indent the authoring tool assigned, and untyped parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub code: u16,
    #[serde(default)]
    pub indent: u16,
    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl Command {
    pub fn new(code: u16, indent: u16, parameters: Vec<Value>) -> Self {
        Command {
            code,
            indent,
            parameters,
        }
    }
}

/// An executable program. Frames share the list without cloning it; the VM
/// never mutates a loaded program.
pub type Program = Rc<[Command]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTrigger {
    /// Runs when the player interacts with the event tile.
    Action,
    /// Runs when the player steps onto the event tile.
    Touch,
    /// Starts on its own whenever the condition holds.
    Auto,
}

/// Optional gating for an event page. Both conditions must hold when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_switch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEvent {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub trigger: EventTrigger,
    #[serde(default)]
    pub condition: EventCondition,
    pub commands: Vec<Command>,
}

impl MapEvent {
    pub fn program(&self) -> Program {
        Rc::from(self.commands.clone())
    }
}

/// On-disk map file: `map_<id>.json` under the data root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapFile {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub events: Vec<MapEvent>,
}

impl MapFile {
    pub fn load(path: &Path) -> Result<MapFile> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading map file {}", path.display()))?;
        let map: MapFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing map file {}", path.display()))?;
        for event in &map.events {
            validate_program(&event.commands).with_context(|| {
                format!(
                    "validating map {} event {} in {}",
                    map.id,
                    event.id,
                    path.display()
                )
            })?;
        }
        Ok(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommonEventTrigger {
    /// Only runs when called by id.
    None,
    /// Starts on its own while the switch is on.
    Auto { switch_id: u32 },
}

impl Default for CommonEventTrigger {
    fn default() -> Self {
        CommonEventTrigger::None
    }
}

/// A named, independently invocable program, callable by id from any other
/// program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonEvent {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub trigger: CommonEventTrigger,
    pub commands: Vec<Command>,
}

impl CommonEvent {
    pub fn program(&self) -> Program {
        Rc::from(self.commands.clone())
    }
}

/// Loads `common_events.json`: a flat JSON array of common events.
pub fn load_common_events(path: &Path) -> Result<Vec<CommonEvent>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading common events from {}", path.display()))?;
    let events: Vec<CommonEvent> = serde_json::from_str(&text)
        .with_context(|| format!("parsing common events from {}", path.display()))?;
    for event in &events {
        validate_program(&event.commands)
            .with_context(|| format!("validating common event {} ({})", event.id, event.name))?;
    }
    Ok(events)
}

/// Authoring-tool contract: programs open at indent 0 and indent never steps
/// up by more than one level between consecutive commands.
pub fn validate_program(commands: &[Command]) -> Result<()> {
    if let Some(first) = commands.first() {
        if first.indent != 0 {
            bail!("program starts at indent {} instead of 0", first.indent);
        }
    }
    let mut previous = 0u16;
    for (index, command) in commands.iter().enumerate() {
        if command.indent > previous + 1 {
            bail!(
                "command {} (code {}) jumps from indent {} to {}",
                index,
                command.code,
                previous,
                command.indent
            );
        }
        previous = command.indent;
    }
    Ok(())
}
