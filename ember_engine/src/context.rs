use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::OnceLock;

use ember_formats::SwitchBlock;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Gameplay safety bound applied to every command-driven variable write.
/// The raw store API is not clamped.
pub const VARIABLE_LIMIT: i64 = 99_999_999;

/// Key for event-scoped state: (map id, event id, label).
pub type LocalKey = (u32, u32, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocalValue {
    Int(i64),
    Flag(bool),
}

impl LocalValue {
    pub fn as_int(self) -> i64 {
        match self {
            LocalValue::Int(value) => value,
            LocalValue::Flag(flag) => flag as i64,
        }
    }

    pub fn as_flag(self) -> bool {
        match self {
            LocalValue::Int(value) => value != 0,
            LocalValue::Flag(flag) => flag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalVarOp {
    Set,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Increment,
    Decrement,
    Toggle,
    And,
    Or,
    Xor,
    Delete,
}

impl LocalVarOp {
    pub fn parse(name: &str) -> Option<LocalVarOp> {
        let op = match name {
            "set" => LocalVarOp::Set,
            "add" => LocalVarOp::Add,
            "subtract" => LocalVarOp::Subtract,
            "multiply" => LocalVarOp::Multiply,
            "divide" => LocalVarOp::Divide,
            "modulo" => LocalVarOp::Modulo,
            "increment" => LocalVarOp::Increment,
            "decrement" => LocalVarOp::Decrement,
            "toggle" => LocalVarOp::Toggle,
            "and" => LocalVarOp::And,
            "or" => LocalVarOp::Or,
            "xor" => LocalVarOp::Xor,
            "delete" => LocalVarOp::Delete,
            _ => return None,
        };
        Some(op)
    }

    pub fn name(self) -> &'static str {
        match self {
            LocalVarOp::Set => "set",
            LocalVarOp::Add => "add",
            LocalVarOp::Subtract => "subtract",
            LocalVarOp::Multiply => "multiply",
            LocalVarOp::Divide => "divide",
            LocalVarOp::Modulo => "modulo",
            LocalVarOp::Increment => "increment",
            LocalVarOp::Decrement => "decrement",
            LocalVarOp::Toggle => "toggle",
            LocalVarOp::And => "and",
            LocalVarOp::Or => "or",
            LocalVarOp::Xor => "xor",
            LocalVarOp::Delete => "delete",
        }
    }
}

/// A message prompt published for the message/choice widget. The widget
/// dismisses it by calling `complete_message` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePrompt {
    pub lines: Vec<String>,
    pub choices: Vec<String>,
    pub cancelable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceOutcome {
    Chosen(usize),
    Canceled,
}

/// A pending numeric-input capture: the widget writes the entered number
/// into the named variable via `complete_number_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberInput {
    pub variable_id: u32,
    pub digits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleResult {
    Win,
    Escape,
    Lose,
}

/// A sub-scene transition request. The VM only sets these; a higher-level
/// scene controller polls `take_scene_request` once per tick and performs
/// the actual transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneRequest {
    Battle { troop_id: u32 },
    Shop { goods: Vec<Value> },
    NameEntry { variable_id: u32, max_len: u32 },
    Menu,
    Save,
    GameOver,
}

/// A movement route handed to the movement collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRouteRequest {
    pub target_event: Option<u32>,
    pub route: Value,
}

/// An animation handed to the renderer collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationRequest {
    pub target_event: Option<u32>,
    pub animation_id: u32,
}

#[derive(Debug, Serialize)]
pub struct LocalSwitchEntry {
    pub map_id: u32,
    pub event_id: u32,
    pub label: String,
    pub on: bool,
}

#[derive(Debug, Serialize)]
pub struct LocalVariableEntry {
    pub map_id: u32,
    pub event_id: u32,
    pub key: String,
    pub value: LocalValue,
}

/// Serializable view of the context, dumped by the CLI after a run.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub map_id: u32,
    pub switches: Vec<bool>,
    pub variables: Vec<i64>,
    pub local_switches: Vec<LocalSwitchEntry>,
    pub local_variables: Vec<LocalVariableEntry>,
    pub events: Vec<String>,
}

/// Process-wide mutable state the VM reads and writes, plus the
/// collaborator-facing service state the suspension predicates poll.
/// Confined to the game-loop thread; shared via [`ContextHandle`].
pub struct GameContext {
    verbose: bool,
    map_id: u32,
    switches: Vec<bool>,
    variables: Vec<i64>,
    local_switches: BTreeMap<LocalKey, bool>,
    local_variables: BTreeMap<LocalKey, LocalValue>,
    message: Option<MessagePrompt>,
    choice_result: Option<ChoiceOutcome>,
    number_input: Option<NumberInput>,
    path_routes: VecDeque<PathRouteRequest>,
    active_path_routes: u32,
    path_follow_pending: bool,
    animations: VecDeque<AnimationRequest>,
    animation_pending: bool,
    forced_action: bool,
    scene_request: Option<SceneRequest>,
    scene_active: bool,
    in_battle: bool,
    battle_result: Option<BattleResult>,
    pending_common_event: Option<u32>,
    starting_events: VecDeque<u32>,
    locked_events: BTreeSet<(u32, u32)>,
    erased_events: BTreeSet<(u32, u32)>,
    pending_script_wait: Option<u32>,
    events: Vec<String>,
}

impl GameContext {
    pub fn new(verbose: bool) -> Self {
        GameContext {
            verbose,
            map_id: 0,
            switches: Vec::new(),
            variables: Vec::new(),
            local_switches: BTreeMap::new(),
            local_variables: BTreeMap::new(),
            message: None,
            choice_result: None,
            number_input: None,
            path_routes: VecDeque::new(),
            active_path_routes: 0,
            path_follow_pending: false,
            animations: VecDeque::new(),
            animation_pending: false,
            forced_action: false,
            scene_request: None,
            scene_active: false,
            in_battle: false,
            battle_result: None,
            pending_common_event: None,
            starting_events: VecDeque::new(),
            locked_events: BTreeSet::new(),
            erased_events: BTreeSet::new(),
            pending_script_wait: None,
            events: Vec::new(),
        }
    }

    /// Eagerly allocates the switch vector from level data. The store only
    /// ever grows afterwards.
    pub fn preallocate_switches(&mut self, count: usize) {
        if count > self.switches.len() {
            self.switches.resize(count, false);
        }
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn set_map_id(&mut self, map_id: u32) {
        self.map_id = map_id;
    }

    pub fn switch(&self, index: u32) -> bool {
        self.switches.get(index as usize).copied().unwrap_or(false)
    }

    pub fn set_switch(&mut self, index: u32, on: bool) {
        let index = index as usize;
        if index >= self.switches.len() {
            self.switches.resize(index + 1, false);
        }
        self.switches[index] = on;
    }

    pub fn switches(&self) -> &[bool] {
        &self.switches
    }

    /// Reads beyond the current length yield 0 without growing the store.
    pub fn variable(&self, index: u32) -> i64 {
        self.variables.get(index as usize).copied().unwrap_or(0)
    }

    pub fn set_variable(&mut self, index: u32, value: i64) {
        let index = index as usize;
        if index >= self.variables.len() {
            self.variables.resize(index + 1, 0);
        }
        self.variables[index] = value;
    }

    /// Command-driven write: the result is clamped to the gameplay bound.
    pub fn set_variable_clamped(&mut self, index: u32, value: i64) {
        self.set_variable(index, value.clamp(-VARIABLE_LIMIT, VARIABLE_LIMIT));
    }

    pub fn local_switch(&self, key: &LocalKey) -> bool {
        self.local_switches.get(key).copied().unwrap_or(false)
    }

    pub fn set_local_switch(&mut self, key: LocalKey, on: bool) {
        self.local_switches.insert(key, on);
    }

    pub fn local_variable(&self, key: &LocalKey) -> Option<LocalValue> {
        self.local_variables.get(key).copied()
    }

    /// Applies a compound operation to the stored value, creating the entry
    /// with the op's implicit default on first touch. Returns the resulting
    /// value (None after delete). Divide/modulo by zero is a logged no-op.
    pub fn local_variable_apply(
        &mut self,
        key: LocalKey,
        op: LocalVarOp,
        operand: i64,
    ) -> Option<LocalValue> {
        if op == LocalVarOp::Delete {
            self.local_variables.remove(&key);
            return None;
        }
        let current = self.local_variables.get(&key).copied();
        let int = current.map_or(0, LocalValue::as_int);
        let flag = current.map_or(false, LocalValue::as_flag);
        let next = match op {
            LocalVarOp::Set => LocalValue::Int(operand),
            LocalVarOp::Add => LocalValue::Int(int.saturating_add(operand)),
            LocalVarOp::Subtract => LocalValue::Int(int.saturating_sub(operand)),
            LocalVarOp::Multiply => LocalValue::Int(int.saturating_mul(operand)),
            LocalVarOp::Divide | LocalVarOp::Modulo => {
                if operand == 0 {
                    self.log_event(format!(
                        "local_var.error {} by zero ({}/{}/{})",
                        op.name(),
                        key.0,
                        key.1,
                        key.2
                    ));
                    return current;
                }
                if op == LocalVarOp::Divide {
                    LocalValue::Int(int / operand)
                } else {
                    LocalValue::Int(int % operand)
                }
            }
            LocalVarOp::Increment => LocalValue::Int(int.saturating_add(1)),
            LocalVarOp::Decrement => LocalValue::Int(int.saturating_sub(1)),
            LocalVarOp::Toggle => LocalValue::Flag(!flag),
            LocalVarOp::And => LocalValue::Flag(flag && operand != 0),
            LocalVarOp::Or => LocalValue::Flag(flag || operand != 0),
            LocalVarOp::Xor => LocalValue::Flag(flag ^ (operand != 0)),
            LocalVarOp::Delete => return None,
        };
        self.local_variables.insert(key, next);
        Some(next)
    }

    /// Expands `\v[n]` (variable value) and `\s[n]` (switch state) control
    /// codes in authored message text.
    pub fn expand_text(&self, text: &str) -> String {
        static CODE: OnceLock<Regex> = OnceLock::new();
        let pattern = CODE
            .get_or_init(|| Regex::new(r"\\([vs])\[(\d+)\]").expect("control-code pattern compiles"));
        pattern
            .replace_all(text, |caps: &regex::Captures| {
                let index: u32 = caps[2].parse().unwrap_or(0);
                match &caps[1] {
                    "v" => self.variable(index).to_string(),
                    _ => if self.switch(index) { "ON" } else { "OFF" }.to_string(),
                }
            })
            .into_owned()
    }

    pub fn show_message(&mut self, lines: Vec<String>, choices: Vec<String>, cancelable: bool) {
        let lines: Vec<String> = lines.iter().map(|line| self.expand_text(line)).collect();
        self.log_event(format!(
            "message.show lines={} choices={}",
            lines.len(),
            choices.len()
        ));
        self.choice_result = None;
        self.message = Some(MessagePrompt {
            lines,
            choices,
            cancelable,
        });
    }

    pub fn message_pending(&self) -> bool {
        self.message.is_some()
    }

    pub fn message(&self) -> Option<&MessagePrompt> {
        self.message.as_ref()
    }

    /// Widget completion callback. Clears the pending prompt and stores the
    /// outcome for whichever frame published the prompt.
    pub fn complete_message(&mut self, outcome: Option<ChoiceOutcome>) {
        if self.message.take().is_none() {
            self.log_event("message.complete without pending prompt".to_string());
        } else {
            match outcome {
                Some(ChoiceOutcome::Chosen(index)) => {
                    self.log_event(format!("message.complete choice={index}"))
                }
                Some(ChoiceOutcome::Canceled) => {
                    self.log_event("message.complete canceled".to_string())
                }
                None => self.log_event("message.complete".to_string()),
            }
        }
        self.choice_result = outcome;
    }

    pub fn take_choice_result(&mut self) -> Option<ChoiceOutcome> {
        self.choice_result.take()
    }

    pub fn begin_number_input(&mut self, input: NumberInput) {
        self.log_event(format!(
            "input.number variable={} digits={}",
            input.variable_id, input.digits
        ));
        self.number_input = Some(input);
    }

    pub fn number_input_pending(&self) -> bool {
        self.number_input.is_some()
    }

    pub fn number_input(&self) -> Option<NumberInput> {
        self.number_input
    }

    pub fn complete_number_input(&mut self, value: i64) {
        if let Some(input) = self.number_input.take() {
            self.set_variable_clamped(input.variable_id, value);
            self.log_event(format!(
                "input.complete variable={} value={value}",
                input.variable_id
            ));
        }
    }

    pub fn request_path_route(&mut self, request: PathRouteRequest, wait: bool) {
        self.log_event(format!(
            "path.request target={:?} wait={wait}",
            request.target_event
        ));
        self.path_routes.push_back(request);
        self.active_path_routes += 1;
        if wait {
            self.path_follow_pending = true;
        }
    }

    pub fn take_path_route(&mut self) -> Option<PathRouteRequest> {
        self.path_routes.pop_front()
    }

    pub fn path_routes_active(&self) -> bool {
        self.active_path_routes > 0
    }

    pub fn path_follow_pending(&self) -> bool {
        self.path_follow_pending
    }

    pub fn wait_for_path_completion(&mut self) {
        if self.active_path_routes > 0 {
            self.path_follow_pending = true;
        }
    }

    /// Movement collaborator callback: one issued route finished.
    pub fn complete_path_route(&mut self) {
        self.active_path_routes = self.active_path_routes.saturating_sub(1);
        if self.active_path_routes == 0 {
            self.path_follow_pending = false;
        }
    }

    pub fn request_animation(&mut self, request: AnimationRequest, wait: bool) {
        self.log_event(format!(
            "animation.request id={} target={:?} wait={wait}",
            request.animation_id, request.target_event
        ));
        self.animations.push_back(request);
        if wait {
            self.animation_pending = true;
        }
    }

    pub fn take_animation(&mut self) -> Option<AnimationRequest> {
        self.animations.pop_front()
    }

    pub fn animation_pending(&self) -> bool {
        self.animation_pending
    }

    /// Renderer collaborator callback.
    pub fn complete_animation(&mut self) {
        self.animation_pending = false;
    }

    pub fn forced_action(&self) -> bool {
        self.forced_action
    }

    pub fn set_forced_action(&mut self, forced: bool) {
        self.forced_action = forced;
    }

    pub fn request_scene(&mut self, request: SceneRequest) {
        self.log_event(format!("scene.request {}", scene_label(&request)));
        if matches!(request, SceneRequest::Battle { .. }) {
            self.battle_result = None;
        }
        self.scene_request = Some(request);
    }

    /// True while a request is unclaimed or the claimed scene is still
    /// running; a map frame stays suspended for the whole span.
    pub fn scene_pending(&self) -> bool {
        self.scene_request.is_some() || self.scene_active
    }

    /// True only while a request is unclaimed. Battle frames run inside the
    /// active scene and suspend on this narrower predicate.
    pub fn scene_request_pending(&self) -> bool {
        self.scene_request.is_some()
    }

    pub fn take_scene_request(&mut self) -> Option<SceneRequest> {
        let request = self.scene_request.take()?;
        self.scene_active = true;
        self.in_battle = matches!(request, SceneRequest::Battle { .. });
        Some(request)
    }

    pub fn finish_scene(&mut self) {
        self.scene_active = false;
        self.in_battle = false;
    }

    pub fn in_battle(&self) -> bool {
        self.in_battle
    }

    pub fn complete_battle(&mut self, result: BattleResult) {
        self.log_event(format!("battle.result {result:?}"));
        self.battle_result = Some(result);
        self.finish_scene();
    }

    pub fn take_battle_result(&mut self) -> Option<BattleResult> {
        self.battle_result.take()
    }

    pub fn request_common_event(&mut self, id: u32) {
        self.pending_common_event = Some(id);
    }

    pub fn take_pending_common_event(&mut self) -> Option<u32> {
        self.pending_common_event.take()
    }

    /// Queues a map event for the root frame (player interaction, touch).
    pub fn push_starting_event(&mut self, event_id: u32) {
        self.starting_events.push_back(event_id);
    }

    pub fn take_starting_event(&mut self) -> Option<u32> {
        self.starting_events.pop_front()
    }

    pub fn lock_event(&mut self, map_id: u32, event_id: u32) {
        self.locked_events.insert((map_id, event_id));
    }

    pub fn unlock_event(&mut self, map_id: u32, event_id: u32) {
        self.locked_events.remove(&(map_id, event_id));
    }

    pub fn is_event_locked(&self, map_id: u32, event_id: u32) -> bool {
        self.locked_events.contains(&(map_id, event_id))
    }

    pub fn erase_event(&mut self, map_id: u32, event_id: u32) {
        self.log_event(format!("event.erase map={map_id} event={event_id}"));
        self.erased_events.insert((map_id, event_id));
    }

    pub fn is_event_erased(&self, map_id: u32, event_id: u32) -> bool {
        self.erased_events.contains(&(map_id, event_id))
    }

    /// Set by authored script code; the frame transfers it into its wait
    /// counter after the next yield.
    pub fn request_script_wait(&mut self, ticks: u32) {
        self.pending_script_wait = Some(ticks);
    }

    pub fn take_script_wait(&mut self) -> Option<u32> {
        self.pending_script_wait.take()
    }

    /// Save-blob view of the switch bank. The bit-packed framing must stay
    /// bit-exact across versions.
    pub fn switch_block(&self) -> SwitchBlock {
        SwitchBlock::new(self.switches.clone())
    }

    pub fn restore_switches(&mut self, block: SwitchBlock) {
        self.switches = block.switches;
    }

    pub fn log_event(&mut self, event: impl Into<String>) {
        let event = event.into();
        if self.verbose {
            eprintln!("[ember_engine] {event}");
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            map_id: self.map_id,
            switches: self.switches.clone(),
            variables: self.variables.clone(),
            local_switches: self
                .local_switches
                .iter()
                .map(|((map_id, event_id, label), on)| LocalSwitchEntry {
                    map_id: *map_id,
                    event_id: *event_id,
                    label: label.clone(),
                    on: *on,
                })
                .collect(),
            local_variables: self
                .local_variables
                .iter()
                .map(|((map_id, event_id, key), value)| LocalVariableEntry {
                    map_id: *map_id,
                    event_id: *event_id,
                    key: key.clone(),
                    value: *value,
                })
                .collect(),
            events: self.events.clone(),
        }
    }
}

fn scene_label(request: &SceneRequest) -> String {
    match request {
        SceneRequest::Battle { troop_id } => format!("battle troop={troop_id}"),
        SceneRequest::Shop { goods } => format!("shop goods={}", goods.len()),
        SceneRequest::NameEntry { variable_id, .. } => {
            format!("name_entry variable={variable_id}")
        }
        SceneRequest::Menu => "menu".to_string(),
        SceneRequest::Save => "save".to_string(),
        SceneRequest::GameOver => "game_over".to_string(),
    }
}

/// Cloneable handle shared by the interpreter, the script host, and the Lua
/// callbacks. Every method takes a scoped borrow; none holds one across a
/// coroutine resume.
#[derive(Clone)]
pub struct ContextHandle {
    inner: Rc<RefCell<GameContext>>,
}

impl ContextHandle {
    pub fn new(context: GameContext) -> Self {
        ContextHandle {
            inner: Rc::new(RefCell::new(context)),
        }
    }

    pub fn map_id(&self) -> u32 {
        self.inner.borrow().map_id()
    }

    pub fn set_map_id(&self, map_id: u32) {
        self.inner.borrow_mut().set_map_id(map_id);
    }

    pub fn switch(&self, index: u32) -> bool {
        self.inner.borrow().switch(index)
    }

    pub fn set_switch(&self, index: u32, on: bool) {
        self.inner.borrow_mut().set_switch(index, on);
    }

    pub fn variable(&self, index: u32) -> i64 {
        self.inner.borrow().variable(index)
    }

    pub fn set_variable(&self, index: u32, value: i64) {
        self.inner.borrow_mut().set_variable(index, value);
    }

    pub fn set_variable_clamped(&self, index: u32, value: i64) {
        self.inner.borrow_mut().set_variable_clamped(index, value);
    }

    pub fn local_switch(&self, key: &LocalKey) -> bool {
        self.inner.borrow().local_switch(key)
    }

    pub fn set_local_switch(&self, key: LocalKey, on: bool) {
        self.inner.borrow_mut().set_local_switch(key, on);
    }

    pub fn local_variable(&self, key: &LocalKey) -> Option<LocalValue> {
        self.inner.borrow().local_variable(key)
    }

    pub fn local_variable_apply(
        &self,
        key: LocalKey,
        op: LocalVarOp,
        operand: i64,
    ) -> Option<LocalValue> {
        self.inner.borrow_mut().local_variable_apply(key, op, operand)
    }

    pub fn show_message(&self, lines: Vec<String>, choices: Vec<String>, cancelable: bool) {
        self.inner.borrow_mut().show_message(lines, choices, cancelable);
    }

    pub fn message_pending(&self) -> bool {
        self.inner.borrow().message_pending()
    }

    pub fn message(&self) -> Option<MessagePrompt> {
        self.inner.borrow().message().cloned()
    }

    pub fn complete_message(&self, outcome: Option<ChoiceOutcome>) {
        self.inner.borrow_mut().complete_message(outcome);
    }

    pub fn take_choice_result(&self) -> Option<ChoiceOutcome> {
        self.inner.borrow_mut().take_choice_result()
    }

    pub fn begin_number_input(&self, input: NumberInput) {
        self.inner.borrow_mut().begin_number_input(input);
    }

    pub fn number_input_pending(&self) -> bool {
        self.inner.borrow().number_input_pending()
    }

    pub fn number_input(&self) -> Option<NumberInput> {
        self.inner.borrow().number_input()
    }

    pub fn complete_number_input(&self, value: i64) {
        self.inner.borrow_mut().complete_number_input(value);
    }

    pub fn request_path_route(&self, request: PathRouteRequest, wait: bool) {
        self.inner.borrow_mut().request_path_route(request, wait);
    }

    pub fn take_path_route(&self) -> Option<PathRouteRequest> {
        self.inner.borrow_mut().take_path_route()
    }

    pub fn path_routes_active(&self) -> bool {
        self.inner.borrow().path_routes_active()
    }

    pub fn path_follow_pending(&self) -> bool {
        self.inner.borrow().path_follow_pending()
    }

    pub fn wait_for_path_completion(&self) {
        self.inner.borrow_mut().wait_for_path_completion();
    }

    pub fn complete_path_route(&self) {
        self.inner.borrow_mut().complete_path_route();
    }

    pub fn request_animation(&self, request: AnimationRequest, wait: bool) {
        self.inner.borrow_mut().request_animation(request, wait);
    }

    pub fn take_animation(&self) -> Option<AnimationRequest> {
        self.inner.borrow_mut().take_animation()
    }

    pub fn animation_pending(&self) -> bool {
        self.inner.borrow().animation_pending()
    }

    pub fn complete_animation(&self) {
        self.inner.borrow_mut().complete_animation();
    }

    pub fn forced_action(&self) -> bool {
        self.inner.borrow().forced_action()
    }

    pub fn set_forced_action(&self, forced: bool) {
        self.inner.borrow_mut().set_forced_action(forced);
    }

    pub fn request_scene(&self, request: SceneRequest) {
        self.inner.borrow_mut().request_scene(request);
    }

    pub fn scene_pending(&self) -> bool {
        self.inner.borrow().scene_pending()
    }

    pub fn scene_request_pending(&self) -> bool {
        self.inner.borrow().scene_request_pending()
    }

    pub fn take_scene_request(&self) -> Option<SceneRequest> {
        self.inner.borrow_mut().take_scene_request()
    }

    pub fn finish_scene(&self) {
        self.inner.borrow_mut().finish_scene();
    }

    pub fn in_battle(&self) -> bool {
        self.inner.borrow().in_battle()
    }

    pub fn complete_battle(&self, result: BattleResult) {
        self.inner.borrow_mut().complete_battle(result);
    }

    pub fn take_battle_result(&self) -> Option<BattleResult> {
        self.inner.borrow_mut().take_battle_result()
    }

    pub fn request_common_event(&self, id: u32) {
        self.inner.borrow_mut().request_common_event(id);
    }

    pub fn take_pending_common_event(&self) -> Option<u32> {
        self.inner.borrow_mut().take_pending_common_event()
    }

    pub fn push_starting_event(&self, event_id: u32) {
        self.inner.borrow_mut().push_starting_event(event_id);
    }

    pub fn take_starting_event(&self) -> Option<u32> {
        self.inner.borrow_mut().take_starting_event()
    }

    pub fn lock_event(&self, map_id: u32, event_id: u32) {
        self.inner.borrow_mut().lock_event(map_id, event_id);
    }

    pub fn unlock_event(&self, map_id: u32, event_id: u32) {
        self.inner.borrow_mut().unlock_event(map_id, event_id);
    }

    pub fn is_event_locked(&self, map_id: u32, event_id: u32) -> bool {
        self.inner.borrow().is_event_locked(map_id, event_id)
    }

    pub fn erase_event(&self, map_id: u32, event_id: u32) {
        self.inner.borrow_mut().erase_event(map_id, event_id);
    }

    pub fn is_event_erased(&self, map_id: u32, event_id: u32) -> bool {
        self.inner.borrow().is_event_erased(map_id, event_id)
    }

    pub fn request_script_wait(&self, ticks: u32) {
        self.inner.borrow_mut().request_script_wait(ticks);
    }

    pub fn take_script_wait(&self) -> Option<u32> {
        self.inner.borrow_mut().take_script_wait()
    }

    pub fn switch_block(&self) -> SwitchBlock {
        self.inner.borrow().switch_block()
    }

    pub fn restore_switches(&self, block: SwitchBlock) {
        self.inner.borrow_mut().restore_switches(block);
    }

    pub fn log_event(&self, event: impl Into<String>) {
        self.inner.borrow_mut().log_event(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.borrow().events().to_vec()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.borrow().snapshot()
    }
}
