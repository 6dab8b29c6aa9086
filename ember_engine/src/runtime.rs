use std::fs;
use std::rc::Rc;

use anyhow::{bail, Context as _, Result};
use ember_formats::Program;

use crate::cli::Args;
use crate::context::{BattleResult, ChoiceOutcome, ContextHandle, GameContext, SceneRequest};
use crate::events::EventCollection;
use crate::interpreter::Interpreter;
use crate::script::{ScriptError, ScriptHost};

/// Wires the context, the script host, and the two permanent root frames.
/// The frames are constructed once and reset through `setup`; the hot path
/// never rebuilds them.
pub struct GameRuntime {
    context: ContextHandle,
    collection: Rc<EventCollection>,
    map_frame: Interpreter,
    battle_frame: Interpreter,
}

impl GameRuntime {
    pub fn new(collection: EventCollection, verbose: bool) -> Result<Self, ScriptError> {
        let mut state = GameContext::new(verbose);
        state.preallocate_switches(collection.switch_capacity());
        let context = ContextHandle::new(state);
        let script = Rc::new(ScriptHost::new(context.clone())?);
        let collection = Rc::new(collection);
        let map_frame = Interpreter::new(context.clone(), script.clone(), collection.clone());
        let battle_frame = Interpreter::new_battle(context.clone(), script, collection.clone());
        Ok(GameRuntime {
            context,
            collection,
            map_frame,
            battle_frame,
        })
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// One host tick: the battle frame runs while a battle scene is active,
    /// the map frame otherwise.
    pub fn tick(&mut self) {
        if self.context.in_battle() {
            self.battle_frame.update();
        } else {
            self.map_frame.update();
        }
    }

    pub fn is_running(&self) -> bool {
        self.map_frame.is_running() || self.battle_frame.is_running()
    }

    /// Queues a map event for the root frame (player interaction). Returns
    /// false when the current map has no such event.
    pub fn trigger_map_event(&mut self, event_id: u32) -> bool {
        let map_id = self.context.map_id();
        if self.collection.map_event(map_id, event_id).is_none() {
            return false;
        }
        self.context.push_starting_event(event_id);
        true
    }

    /// Runs authored script source on the map frame in coroutine mode.
    pub fn start_script(&mut self, source: &str, label: &str) {
        self.map_frame.setup_script(source, label, None);
    }

    /// Loads a battle-context program (battle-effect hooks supply these).
    pub fn setup_battle_program(&mut self, program: Program, event_id: Option<u32>) {
        self.battle_frame.setup(program, event_id);
    }
}

pub fn execute(args: Args) -> Result<()> {
    let Args {
        data_root,
        map,
        event,
        script,
        ticks,
        auto_dismiss,
        event_log_json,
        state_json,
        verbose,
    } = args;

    let collection = EventCollection::load_from_dir(&data_root)
        .with_context(|| format!("loading event data from {}", data_root.display()))?;
    let mut runtime = GameRuntime::new(collection, verbose)?;
    runtime.context().set_map_id(map);

    if let Some(path) = script.as_ref() {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string());
        runtime.start_script(&source, &label);
    } else if let Some(event_id) = event {
        if !runtime.trigger_map_event(event_id) {
            bail!("map {map} has no event {event_id}");
        }
    }

    for _ in 0..ticks {
        runtime.tick();
        if auto_dismiss {
            dismiss_pending_prompts(runtime.context());
        }
        if !runtime.is_running() && !runtime.context().message_pending() {
            break;
        }
    }

    let context = runtime.context().clone();
    if let Some(path) = event_log_json.as_ref() {
        let json = serde_json::to_string_pretty(&context.events())
            .context("serializing event log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing event log to {}", path.display()))?;
        println!("Saved event log to {}", path.display());
    }
    if let Some(path) = state_json.as_ref() {
        let json = serde_json::to_string_pretty(&context.snapshot())
            .context("serializing state snapshot to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing state snapshot to {}", path.display()))?;
        println!("Saved state snapshot to {}", path.display());
    }

    Ok(())
}

/// Stand-in collaborators for unattended runs: dismiss prompts with the
/// first option, zero out number inputs, win battles, finish other scenes,
/// and report movement/animation completion immediately.
fn dismiss_pending_prompts(context: &ContextHandle) {
    if let Some(prompt) = context.message() {
        let outcome = if prompt.choices.is_empty() {
            None
        } else {
            Some(ChoiceOutcome::Chosen(0))
        };
        context.complete_message(outcome);
    }
    if context.number_input_pending() {
        context.complete_number_input(0);
    }
    if let Some(request) = context.take_scene_request() {
        match request {
            SceneRequest::Battle { .. } => context.complete_battle(BattleResult::Win),
            _ => context.finish_scene(),
        }
    }
    while context.take_path_route().is_some() {
        context.complete_path_route();
    }
    while context.take_animation().is_some() {}
    if context.animation_pending() {
        context.complete_animation();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use ember_formats::{Command, EventCondition, EventTrigger, MapEvent, MapFile};

    use super::{dismiss_pending_prompts, GameRuntime};
    use crate::events::EventCollection;

    fn sample_collection() -> EventCollection {
        EventCollection::from_parts(
            vec![MapFile {
                id: 1,
                name: "village".to_string(),
                events: vec![MapEvent {
                    id: 2,
                    name: "innkeeper".to_string(),
                    trigger: EventTrigger::Action,
                    condition: EventCondition::default(),
                    commands: vec![
                        Command::new(101, 0, vec![json!("Welcome back.")]),
                        Command::new(121, 0, vec![json!(15), json!(15), json!(true)]),
                    ],
                }],
            }],
            Vec::new(),
        )
    }

    #[test]
    fn tick_drives_a_triggered_event_to_completion() {
        let mut runtime = GameRuntime::new(sample_collection(), false).expect("runtime builds");
        runtime.context().set_map_id(1);
        assert!(runtime.trigger_map_event(2));
        assert!(!runtime.trigger_map_event(9), "unknown events are rejected");

        runtime.tick();
        assert!(runtime.context().message_pending());
        dismiss_pending_prompts(runtime.context());
        runtime.tick();
        assert!(runtime.context().switch(15));
        assert!(!runtime.is_running());
    }

    #[test]
    fn script_mode_runs_on_the_map_frame() {
        let mut runtime = GameRuntime::new(EventCollection::empty(), false).expect("runtime builds");
        runtime.start_script("vm.set_variable(3, 9)", "inline");
        runtime.tick();
        assert_eq!(runtime.context().variable(3), 9);
        assert!(!runtime.is_running());
    }
}
