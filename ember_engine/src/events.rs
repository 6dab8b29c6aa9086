use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use ember_formats::{load_common_events, CommonEvent, CommonEventTrigger, MapEvent, MapFile};

/// Immutable event data for the VM: map files plus the common-event table.
/// Loaded once from the data root; the interpreter only ever reads it.
pub struct EventCollection {
    maps: BTreeMap<u32, MapFile>,
    common_events: BTreeMap<u32, CommonEvent>,
}

impl EventCollection {
    pub fn empty() -> Self {
        EventCollection {
            maps: BTreeMap::new(),
            common_events: BTreeMap::new(),
        }
    }

    pub fn from_parts(maps: Vec<MapFile>, common_events: Vec<CommonEvent>) -> Self {
        let mut collection = EventCollection::empty();
        for map in maps {
            collection.maps.insert(map.id, map);
        }
        for event in common_events {
            collection.common_events.insert(event.id, event);
        }
        collection
    }

    /// Scans the data root for `map_<id>.json` files and `common_events.json`.
    pub fn load_from_dir(root: &Path) -> Result<Self> {
        let mut collection = EventCollection::empty();
        for entry in WalkDir::new(root).min_depth(1).max_depth(2) {
            let entry =
                entry.with_context(|| format!("scanning event data root {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "common_events.json" {
                for event in load_common_events(entry.path())? {
                    collection.common_events.insert(event.id, event);
                }
            } else if name.starts_with("map_") && name.ends_with(".json") {
                let map = MapFile::load(entry.path())?;
                collection.maps.insert(map.id, map);
            }
        }
        Ok(collection)
    }

    pub fn map(&self, map_id: u32) -> Option<&MapFile> {
        self.maps.get(&map_id)
    }

    pub fn map_event(&self, map_id: u32, event_id: u32) -> Option<&MapEvent> {
        self.maps
            .get(&map_id)?
            .events
            .iter()
            .find(|event| event.id == event_id)
    }

    pub fn common_event(&self, id: u32) -> Option<&CommonEvent> {
        self.common_events.get(&id)
    }

    pub fn common_events(&self) -> impl Iterator<Item = &CommonEvent> {
        self.common_events.values()
    }

    /// Highest switch index referenced by triggers and conditions, plus one.
    /// The context pre-sizes its switch vector from this.
    pub fn switch_capacity(&self) -> usize {
        let mut highest: Option<u32> = None;
        for map in self.maps.values() {
            for event in &map.events {
                if let Some(id) = event.condition.switch_id {
                    highest = Some(highest.map_or(id, |h| h.max(id)));
                }
            }
        }
        for event in self.common_events.values() {
            if let CommonEventTrigger::Auto { switch_id } = event.trigger {
                highest = Some(highest.map_or(switch_id, |h| h.max(switch_id)));
            }
        }
        highest.map_or(0, |h| h as usize + 1)
    }
}
