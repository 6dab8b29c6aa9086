use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

use ember_formats::{Command, CommonEventTrigger, EventTrigger, MapEvent, Program};

use crate::context::{
    AnimationRequest, BattleResult, ChoiceOutcome, ContextHandle, LocalVarOp, NumberInput,
    PathRouteRequest, SceneRequest,
};
use crate::events::EventCollection;
use crate::ops::Op;
use crate::script::{ScriptHost, ScriptTask, TaskStep};

/// Hard cap on nested sub-program depth. Exceeding it terminates the
/// process rather than silently truncating a runaway recursive call chain.
pub const MAX_CALL_DEPTH: u32 = 100;

/// Soft instruction budget per `update()` call. A pathological command list
/// yields back to the host render loop mid-program and resumes next tick.
pub const COMMANDS_PER_TICK: usize = 100;

/// Pending control-flow resolution, keyed by the opening command's indent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchValue {
    Bool(bool),
    Choice(u16),
    Cancel,
    Battle(BattleResult),
}

/// An outcome the frame is waiting to fold into its branch stack once the
/// collaborator reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingBranch {
    Choice { indent: u16 },
    Battle { indent: u16 },
}

enum Step {
    Continue,
    Suspend,
}

/// One execution context of the VM: program counter, branch stack,
/// suspension state, and an optionally owned child frame for nested
/// invocation. The two permanent frames (map and battle) are pooled by the
/// runtime and reset through `setup`.
pub struct Interpreter {
    depth: u32,
    battle_context: bool,
    map_id: u32,
    event_id: Option<u32>,
    program: Option<Program>,
    ops: Vec<Op>,
    index: usize,
    branch: BTreeMap<u16, BranchValue>,
    wait_count: u32,
    pending_branch: Option<PendingBranch>,
    child: Option<Box<Interpreter>>,
    task: Option<ScriptTask>,
    context: ContextHandle,
    script: Rc<ScriptHost>,
    collection: Rc<EventCollection>,
}

impl Interpreter {
    pub fn new(
        context: ContextHandle,
        script: Rc<ScriptHost>,
        collection: Rc<EventCollection>,
    ) -> Self {
        Interpreter::new_frame(0, false, context, script, collection)
    }

    /// Root frame for battle-context programs. It keeps running while the
    /// battle scene is active instead of suspending on it.
    pub fn new_battle(
        context: ContextHandle,
        script: Rc<ScriptHost>,
        collection: Rc<EventCollection>,
    ) -> Self {
        Interpreter::new_frame(0, true, context, script, collection)
    }

    fn new_frame(
        depth: u32,
        battle_context: bool,
        context: ContextHandle,
        script: Rc<ScriptHost>,
        collection: Rc<EventCollection>,
    ) -> Self {
        Interpreter {
            depth,
            battle_context,
            map_id: context.map_id(),
            event_id: None,
            program: None,
            ops: Vec::new(),
            index: 0,
            branch: BTreeMap::new(),
            wait_count: 0,
            pending_branch: None,
            child: None,
            task: None,
            context,
            script,
            collection,
        }
    }

    /// Replaces the frame's program wholesale, clearing the branch stack and
    /// every suspension flag. This is the only reset path.
    pub fn setup(&mut self, program: Program, event_id: Option<u32>) {
        self.map_id = self.context.map_id();
        self.event_id = event_id;
        self.ops = program
            .iter()
            .map(|command| Op::from_code(command.code))
            .collect();
        self.program = Some(program);
        self.index = 0;
        self.branch.clear();
        self.wait_count = 0;
        self.pending_branch = None;
        self.child = None;
        if let Some(task) = self.task.take() {
            self.script.finish_task(task);
        }
    }

    /// Starts coroutine mode: the frame runs authored script source instead
    /// of a command list. Starting a second coroutine while one is active is
    /// a programming error.
    pub fn setup_script(&mut self, source: &str, label: &str, event_id: Option<u32>) {
        assert!(
            self.task.is_none(),
            "a coroutine is already active on this frame"
        );
        self.map_id = self.context.map_id();
        self.event_id = event_id;
        self.program = None;
        self.ops.clear();
        self.index = 0;
        self.branch.clear();
        self.wait_count = 0;
        self.pending_branch = None;
        self.child = None;
        match self.script.start_task(source, label) {
            Ok(task) => self.task = Some(task),
            Err(err) => self.context.log_event(format!("script.error {label}: {err}")),
        }
    }

    pub fn is_running(&self) -> bool {
        self.program.is_some() || self.task.is_some()
    }

    /// Constructs the depth+1 child frame and parks this frame's program
    /// behind it until the child finishes.
    pub fn launch_child(&mut self, program: Program, event_id: Option<u32>) {
        let depth = self.depth + 1;
        if depth > MAX_CALL_DEPTH {
            panic!("event call depth exceeded the cap of {MAX_CALL_DEPTH} nested invocations");
        }
        let mut child = Interpreter::new_frame(
            depth,
            self.battle_context,
            self.context.clone(),
            self.script.clone(),
            self.collection.clone(),
        );
        child.setup(program, event_id);
        self.child = Some(Box::new(child));
    }

    /// Advances execution by zero or more commands. Never blocks; effects
    /// are observed through `is_running` and the shared context.
    pub fn update(&mut self) {
        let mut executed = 0usize;
        loop {
            // An event cannot act on behalf of a map it is no longer part of.
            if self.context.map_id() != self.map_id {
                self.event_id = None;
            }

            if let Some(child) = self.child.as_mut() {
                child.update();
                if child.is_running() {
                    return;
                }
                self.child = None;
            }

            self.absorb_outcomes();

            if self.suspended() {
                return;
            }

            if let Some(task) = self.task.take() {
                match self.script.resume(&task) {
                    TaskStep::Yielded => {
                        self.task = Some(task);
                        if let Some(ticks) = self.context.take_script_wait() {
                            self.wait_count = ticks;
                        }
                    }
                    TaskStep::Completed => self.script.finish_task(task),
                }
                return;
            }

            if self.program.is_none() {
                if self.depth == 0 {
                    self.setup_starting_event();
                }
                if self.program.is_none() {
                    return;
                }
            }

            if self.index >= self.ops.len() {
                self.end_program();
                executed += 1;
                if executed >= COMMANDS_PER_TICK {
                    return;
                }
                continue;
            }

            match self.execute_command() {
                Step::Continue => self.index += 1,
                Step::Suspend => return,
            }

            executed += 1;
            if executed >= COMMANDS_PER_TICK {
                return;
            }
        }
    }

    /// Suspension predicates in fixed priority order. The first true
    /// predicate halts the tick.
    fn suspended(&mut self) -> bool {
        if self.context.message_pending() {
            return true;
        }
        if self.context.path_follow_pending() {
            return true;
        }
        if self.context.animation_pending() {
            return true;
        }
        if self.context.number_input_pending() {
            return true;
        }
        if self.wait_count > 0 {
            self.wait_count -= 1;
            return true;
        }
        if self.context.forced_action() {
            return true;
        }
        if self.battle_context {
            // Battle frames run inside the active scene; only a fresh
            // request suspends them.
            if self.context.scene_request_pending() {
                return true;
            }
        } else if self.context.scene_pending() {
            return true;
        }
        false
    }

    /// Folds a completed prompt or battle outcome into the branch stack.
    fn absorb_outcomes(&mut self) {
        match self.pending_branch {
            Some(PendingBranch::Choice { indent }) => {
                if !self.context.message_pending() {
                    if let Some(outcome) = self.context.take_choice_result() {
                        let value = match outcome {
                            ChoiceOutcome::Chosen(index) => BranchValue::Choice(index as u16),
                            ChoiceOutcome::Canceled => BranchValue::Cancel,
                        };
                        self.branch.insert(indent, value);
                    }
                    self.pending_branch = None;
                }
            }
            Some(PendingBranch::Battle { indent }) => {
                if let Some(result) = self.context.take_battle_result() {
                    self.branch.insert(indent, BranchValue::Battle(result));
                    self.pending_branch = None;
                }
            }
            None => {}
        }
    }

    fn end_program(&mut self) {
        self.program = None;
        self.ops.clear();
        self.index = 0;
        self.branch.clear();
        self.pending_branch = None;
        if self.depth == 0 {
            if let Some(event_id) = self.event_id {
                self.context.unlock_event(self.map_id, event_id);
            }
        }
    }

    /// Auto-load scan for an idle root frame: a pending common-event
    /// request, then map-local triggerable events, then switch-triggered
    /// common events.
    fn setup_starting_event(&mut self) {
        let collection = self.collection.clone();

        if let Some(id) = self.context.take_pending_common_event() {
            match collection.common_event(id) {
                Some(event) => {
                    self.context.log_event(format!("event.start common={id}"));
                    self.setup(event.program(), None);
                    return;
                }
                None => self.context.log_event(format!("event.unknown_common id={id}")),
            }
        }

        let map_id = self.context.map_id();

        while let Some(event_id) = self.context.take_starting_event() {
            if self.context.is_event_erased(map_id, event_id) {
                continue;
            }
            match collection.map_event(map_id, event_id) {
                Some(event) => {
                    self.context.lock_event(map_id, event_id);
                    self.context
                        .log_event(format!("event.start map={map_id} event={event_id}"));
                    self.setup(event.program(), Some(event_id));
                    return;
                }
                None => self
                    .context
                    .log_event(format!("event.unknown map={map_id} event={event_id}")),
            }
        }

        if let Some(map) = collection.map(map_id) {
            for event in &map.events {
                if event.trigger != EventTrigger::Auto {
                    continue;
                }
                if self.context.is_event_locked(map_id, event.id)
                    || self.context.is_event_erased(map_id, event.id)
                {
                    continue;
                }
                if !self.event_condition_holds(map_id, event) {
                    continue;
                }
                self.context.lock_event(map_id, event.id);
                self.context
                    .log_event(format!("event.start auto map={map_id} event={}", event.id));
                self.setup(event.program(), Some(event.id));
                return;
            }
        }

        for event in collection.common_events() {
            if let CommonEventTrigger::Auto { switch_id } = event.trigger {
                if self.context.switch(switch_id) {
                    self.context
                        .log_event(format!("event.start common_auto={}", event.id));
                    self.setup(event.program(), None);
                    return;
                }
            }
        }
    }

    fn event_condition_holds(&self, map_id: u32, event: &MapEvent) -> bool {
        if let Some(switch_id) = event.condition.switch_id {
            if !self.context.switch(switch_id) {
                return false;
            }
        }
        if let Some(label) = event.condition.local_switch.as_ref() {
            if !self
                .context
                .local_switch(&(map_id, event.id, label.clone()))
            {
                return false;
            }
        }
        true
    }

    fn execute_command(&mut self) -> Step {
        let Some(program) = self.program.clone() else {
            return Step::Continue;
        };
        match self.ops[self.index] {
            Op::Nop | Op::MessageLine | Op::ScriptLine | Op::Label | Op::LoopHead => Step::Continue,
            Op::ShowMessage => self.command_show_message(&program),
            Op::ShowChoices => self.command_show_choices(&program),
            Op::ChoiceCase => self.command_choice_case(&program),
            Op::ChoiceCancelCase => self.command_case(&program, BranchValue::Cancel),
            Op::ChoicesEnd | Op::BranchEnd | Op::BattleEnd => {
                let indent = program[self.index].indent;
                self.branch.remove(&indent);
                Step::Continue
            }
            Op::NumberInput => self.command_number_input(&program),
            Op::Wait => self.command_wait(&program),
            Op::ConditionalBranch => self.command_conditional_branch(&program),
            Op::Else => self.command_case(&program, BranchValue::Bool(false)),
            Op::Repeat => self.command_repeat(&program),
            Op::BreakLoop => self.command_break_loop(&program),
            Op::ExitProgram => {
                self.end_program();
                Step::Continue
            }
            Op::EraseEvent => self.command_erase_event(),
            Op::CallCommonEvent => self.command_call_common_event(&program),
            Op::JumpToLabel => self.command_jump_to_label(&program),
            Op::ControlSwitches => self.command_control_switches(&program),
            Op::ControlVariables => self.command_control_variables(&program),
            Op::ControlLocalSwitch => self.command_control_local_switch(&program),
            Op::LocalVariableOp => self.command_local_variable_op(&program),
            Op::ShowAnimation => self.command_show_animation(&program),
            Op::SetPathRoute => self.command_set_path_route(&program),
            Op::WaitForPath => {
                self.context.wait_for_path_completion();
                Step::Continue
            }
            Op::BattleProcessing => self.command_battle_processing(&program),
            Op::BattleWinCase => self.command_case(&program, BranchValue::Battle(BattleResult::Win)),
            Op::BattleEscapeCase => {
                self.command_case(&program, BranchValue::Battle(BattleResult::Escape))
            }
            Op::BattleLoseCase => {
                self.command_case(&program, BranchValue::Battle(BattleResult::Lose))
            }
            Op::ShopProcessing => self.command_shop_processing(&program),
            Op::NameEntry => self.command_name_entry(&program),
            Op::CallMenu => {
                self.context.request_scene(SceneRequest::Menu);
                Step::Continue
            }
            Op::CallSave => {
                self.context.request_scene(SceneRequest::Save);
                Step::Continue
            }
            Op::GameOver => {
                self.context.request_scene(SceneRequest::GameOver);
                Step::Continue
            }
            Op::Script => self.command_script(&program),
            Op::Unknown(code) => {
                self.context.log_event(format!("command.unknown code={code}"));
                Step::Continue
            }
        }
    }

    /// Advances the counter to just before the next command at `indent`, so
    /// the normal post-command advance lands exactly on it. Linear forward
    /// scan, at most once per branch miss.
    fn skip_to_sibling(&mut self, program: &Program, indent: u16) -> Step {
        while self.index + 1 < program.len() {
            if program[self.index + 1].indent == indent {
                break;
            }
            self.index += 1;
        }
        Step::Continue
    }

    fn command_show_message(&mut self, program: &Program) -> Step {
        if self.context.message_pending() {
            return Step::Suspend;
        }
        let mut lines = vec![param_str(&program[self.index], 0).unwrap_or_default()];
        while self.index + 1 < program.len() && self.ops[self.index + 1] == Op::MessageLine {
            self.index += 1;
            lines.push(param_str(&program[self.index], 0).unwrap_or_default());
        }
        let mut choices = Vec::new();
        let mut cancelable = false;
        if self.index + 1 < program.len() {
            match self.ops[self.index + 1] {
                // A directly following prompt command shares the window.
                Op::ShowChoices => {
                    self.index += 1;
                    let command = &program[self.index];
                    match parse_choices(command) {
                        Some((options, cancel)) => {
                            self.pending_branch = Some(PendingBranch::Choice {
                                indent: command.indent,
                            });
                            choices = options;
                            cancelable = cancel;
                        }
                        None => self.log_bad_params(command),
                    }
                }
                Op::NumberInput => {
                    self.index += 1;
                    let command = &program[self.index];
                    match parse_number_input(command) {
                        Some(input) => self.context.begin_number_input(input),
                        None => self.log_bad_params(command),
                    }
                }
                _ => {}
            }
        }
        self.context.show_message(lines, choices, cancelable);
        Step::Continue
    }

    fn command_show_choices(&mut self, program: &Program) -> Step {
        if self.context.message_pending() {
            return Step::Suspend;
        }
        let command = &program[self.index];
        match parse_choices(command) {
            Some((options, cancelable)) => {
                self.pending_branch = Some(PendingBranch::Choice {
                    indent: command.indent,
                });
                self.context.show_message(Vec::new(), options, cancelable);
            }
            None => self.log_bad_params(command),
        }
        Step::Continue
    }

    fn command_choice_case(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let indent = command.indent;
        let matched = match (self.branch.get(&indent), param_u64(command, 0)) {
            (Some(BranchValue::Choice(value)), Some(expected)) => *value as u64 == expected,
            _ => false,
        };
        if matched {
            self.branch.remove(&indent);
            Step::Continue
        } else {
            self.skip_to_sibling(program, indent)
        }
    }

    /// Shared test-and-consume for else/cancel/battle-result follow-ups.
    fn command_case(&mut self, program: &Program, expected: BranchValue) -> Step {
        let indent = program[self.index].indent;
        if self.branch.get(&indent) == Some(&expected) {
            self.branch.remove(&indent);
            Step::Continue
        } else {
            self.skip_to_sibling(program, indent)
        }
    }

    fn command_number_input(&mut self, program: &Program) -> Step {
        if self.context.message_pending() {
            return Step::Suspend;
        }
        let command = &program[self.index];
        match parse_number_input(command) {
            Some(input) => self.context.begin_number_input(input),
            None => self.log_bad_params(command),
        }
        Step::Continue
    }

    fn command_wait(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        match param_u32(command, 0) {
            Some(ticks) => self.wait_count = ticks,
            None => self.log_bad_params(command),
        }
        Step::Continue
    }

    fn command_conditional_branch(&mut self, program: &Program) -> Step {
        let command = program[self.index].clone();
        let indent = command.indent;
        let result = self.evaluate_condition(&command);
        self.branch.insert(indent, BranchValue::Bool(result));
        if result {
            Step::Continue
        } else {
            self.skip_to_sibling(program, indent)
        }
    }

    /// A raising or malformed condition is recoverable: logged and treated
    /// as false.
    fn evaluate_condition(&self, command: &Command) -> bool {
        let Some(kind) = param_u64(command, 0) else {
            self.context
                .log_event(format!("condition.params code={}", command.code));
            return false;
        };
        match kind {
            0 => {
                let (Some(switch_id), expected) =
                    (param_u32(command, 1), param_bool(command, 2).unwrap_or(true))
                else {
                    self.context.log_event("condition.params switch".to_string());
                    return false;
                };
                self.context.switch(switch_id) == expected
            }
            1 => {
                let parsed = (|| {
                    Some((
                        param_u32(command, 1)?,
                        param_u64(command, 2)?,
                        param_i64(command, 3)?,
                        param_u64(command, 4)?,
                    ))
                })();
                let Some((variable_id, operand_kind, operand, comparison)) = parsed else {
                    self.context
                        .log_event("condition.params variable".to_string());
                    return false;
                };
                let left = self.context.variable(variable_id);
                let right = match operand_kind {
                    0 => operand,
                    1 => self.context.variable(operand as u32),
                    other => {
                        self.context
                            .log_event(format!("condition.operand kind={other}"));
                        return false;
                    }
                };
                match comparison {
                    0 => left == right,
                    1 => left >= right,
                    2 => left <= right,
                    3 => left > right,
                    4 => left < right,
                    5 => left != right,
                    other => {
                        self.context
                            .log_event(format!("condition.comparison kind={other}"));
                        false
                    }
                }
            }
            2 => {
                let (Some(label), expected) =
                    (param_str(command, 1), param_bool(command, 2).unwrap_or(true))
                else {
                    self.context
                        .log_event("condition.params local switch".to_string());
                    return false;
                };
                match self.event_id {
                    Some(event_id) => {
                        self.context.local_switch(&(self.map_id, event_id, label)) == expected
                    }
                    None => {
                        self.context
                            .log_event("condition.no_event local switch".to_string());
                        false
                    }
                }
            }
            12 => {
                let Some(source) = param_str(command, 1) else {
                    self.context.log_event("condition.params script".to_string());
                    return false;
                };
                match self.script.eval_condition(&source) {
                    Ok(result) => result,
                    Err(err) => {
                        self.context.log_event(format!("condition.error {err}"));
                        false
                    }
                }
            }
            other => {
                self.context.log_event(format!("condition.unknown kind={other}"));
                false
            }
        }
    }

    fn command_repeat(&mut self, program: &Program) -> Step {
        let indent = program[self.index].indent;
        let mut index = self.index;
        while index > 0 {
            index -= 1;
            if program[index].indent == indent {
                self.index = index;
                break;
            }
        }
        Step::Continue
    }

    fn command_break_loop(&mut self, program: &Program) -> Step {
        let indent = program[self.index].indent;
        let mut index = self.index + 1;
        while index < program.len() {
            if self.ops[index] == Op::Repeat && program[index].indent < indent {
                self.index = index;
                return Step::Continue;
            }
            index += 1;
        }
        self.context.log_event("loop.break without enclosing loop".to_string());
        Step::Continue
    }

    fn command_erase_event(&mut self) -> Step {
        match self.event_id {
            Some(event_id) => self.context.erase_event(self.map_id, event_id),
            None => self.context.log_event("command.no_event code=116".to_string()),
        }
        Step::Continue
    }

    fn command_call_common_event(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let Some(id) = param_u32(command, 0) else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        let collection = self.collection.clone();
        match collection.common_event(id) {
            Some(event) => {
                let event_id = self.event_id;
                self.launch_child(event.program(), event_id);
            }
            None => self.context.log_event(format!("event.unknown_common id={id}")),
        }
        Step::Continue
    }

    fn command_jump_to_label(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let Some(name) = param_str(command, 0) else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        let mut index = self.index + 1;
        while index < program.len() {
            if self.ops[index] == Op::Label
                && param_str(&program[index], 0).as_deref() == Some(name.as_str())
            {
                self.index = index;
                return Step::Continue;
            }
            index += 1;
        }
        self.context.log_event(format!("label.missing {name}"));
        Step::Continue
    }

    fn command_control_switches(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let parsed = (|| {
            Some((
                param_u32(command, 0)?,
                param_u32(command, 1)?,
                param_bool(command, 2)?,
            ))
        })();
        let Some((start, end, on)) = parsed else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        for index in start..=end.max(start) {
            self.context.set_switch(index, on);
        }
        Step::Continue
    }

    fn command_control_variables(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let parsed = (|| {
            Some((
                param_u32(command, 0)?,
                param_u32(command, 1)?,
                param_u64(command, 2)?,
                param_u64(command, 3)?,
                param_i64(command, 4)?,
            ))
        })();
        let Some((start, end, op, operand_kind, operand)) = parsed else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        let value = match operand_kind {
            0 => operand,
            1 => self.context.variable(operand as u32),
            other => {
                self.context.log_event(format!("variable.operand kind={other}"));
                return Step::Continue;
            }
        };
        for index in start..=end.max(start) {
            let current = self.context.variable(index);
            let next = match op {
                0 => value,
                1 => current.saturating_add(value),
                2 => current.saturating_sub(value),
                3 => current.saturating_mul(value),
                4 | 5 => {
                    if value == 0 {
                        self.context.log_event("variable.error division by zero".to_string());
                        continue;
                    }
                    if op == 4 {
                        current / value
                    } else {
                        current % value
                    }
                }
                other => {
                    self.context.log_event(format!("variable.op kind={other}"));
                    return Step::Continue;
                }
            };
            self.context.set_variable_clamped(index, next);
        }
        Step::Continue
    }

    fn command_control_local_switch(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let parsed = (|| Some((param_str(command, 0)?, param_bool(command, 1)?)))();
        let Some((label, on)) = parsed else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        match self.event_id {
            Some(event_id) => {
                self.context
                    .set_local_switch((self.map_id, event_id, label), on);
            }
            None => self.context.log_event("command.no_event code=123".to_string()),
        }
        Step::Continue
    }

    fn command_local_variable_op(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let parsed = (|| Some((param_str(command, 0)?, param_str(command, 1)?)))();
        let Some((key, op_name)) = parsed else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        let Some(op) = LocalVarOp::parse(&op_name) else {
            self.context.log_event(format!("local_var.unknown_op {op_name}"));
            return Step::Continue;
        };
        let operand = param_i64(command, 2).unwrap_or(0);
        match self.event_id {
            Some(event_id) => {
                self.context
                    .local_variable_apply((self.map_id, event_id, key), op, operand);
            }
            None => self.context.log_event("command.no_event code=357".to_string()),
        }
        Step::Continue
    }

    fn command_show_animation(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let Some(animation_id) = param_u32(command, 1) else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        let target = param_i64(command, 0).unwrap_or(0);
        let wait = param_bool(command, 2).unwrap_or(false);
        let target_event = self.resolve_target(target);
        self.context.request_animation(
            AnimationRequest {
                target_event,
                animation_id,
            },
            wait,
        );
        Step::Continue
    }

    fn command_set_path_route(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let target = param_i64(command, 0).unwrap_or(0);
        let route = param(command, 1).cloned().unwrap_or(Value::Null);
        let wait = param_bool(command, 2).unwrap_or(false);
        let target_event = self.resolve_target(target);
        self.context
            .request_path_route(PathRouteRequest { target_event, route }, wait);
        Step::Continue
    }

    /// Target convention: 0 = the invoking event, positive = event id,
    /// negative = the player.
    fn resolve_target(&self, target: i64) -> Option<u32> {
        match target {
            0 => self.event_id,
            id if id > 0 => Some(id as u32),
            _ => None,
        }
    }

    fn command_battle_processing(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let Some(troop_id) = param_u32(command, 0) else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        self.pending_branch = Some(PendingBranch::Battle {
            indent: command.indent,
        });
        self.context.request_scene(SceneRequest::Battle { troop_id });
        Step::Continue
    }

    fn command_shop_processing(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let goods = param(command, 0)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.context.request_scene(SceneRequest::Shop { goods });
        Step::Continue
    }

    fn command_name_entry(&mut self, program: &Program) -> Step {
        let command = &program[self.index];
        let parsed = (|| Some((param_u32(command, 0)?, param_u32(command, 1).unwrap_or(8))))();
        let Some((variable_id, max_len)) = parsed else {
            self.log_bad_params(command);
            return Step::Continue;
        };
        self.context.request_scene(SceneRequest::NameEntry {
            variable_id,
            max_len,
        });
        Step::Continue
    }

    fn command_script(&mut self, program: &Program) -> Step {
        let mut source = param_str(&program[self.index], 0).unwrap_or_default();
        while self.index + 1 < program.len() && self.ops[self.index + 1] == Op::ScriptLine {
            self.index += 1;
            source.push('\n');
            source.push_str(&param_str(&program[self.index], 0).unwrap_or_default());
        }
        if let Err(err) = self.script.eval_chunk(&source) {
            self.context.log_event(format!("script.error {err}"));
        }
        Step::Continue
    }

    fn log_bad_params(&self, command: &Command) {
        self.context
            .log_event(format!("command.params code={} index={}", command.code, self.index));
    }
}

fn param<'a>(command: &'a Command, index: usize) -> Option<&'a Value> {
    command.parameters.get(index)
}

fn param_u64(command: &Command, index: usize) -> Option<u64> {
    param(command, index)?.as_u64()
}

fn param_u32(command: &Command, index: usize) -> Option<u32> {
    param_u64(command, index).and_then(|value| u32::try_from(value).ok())
}

fn param_i64(command: &Command, index: usize) -> Option<i64> {
    param(command, index)?.as_i64()
}

fn param_bool(command: &Command, index: usize) -> Option<bool> {
    match param(command, index)? {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_i64().map(|value| value != 0),
        _ => None,
    }
}

fn param_str(command: &Command, index: usize) -> Option<String> {
    param(command, index)?.as_str().map(str::to_string)
}

fn parse_choices(command: &Command) -> Option<(Vec<String>, bool)> {
    let options = param(command, 0)?
        .as_array()?
        .iter()
        .map(|value| value.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    let cancelable = param_bool(command, 1).unwrap_or(false);
    Some((options, cancelable))
}

fn parse_number_input(command: &Command) -> Option<NumberInput> {
    Some(NumberInput {
        variable_id: param_u32(command, 0)?,
        digits: param_u32(command, 1).unwrap_or(1),
    })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::{json, Value};

    use ember_formats::{Command, CommonEvent, CommonEventTrigger, MapFile, Program};

    use super::{Interpreter, COMMANDS_PER_TICK, MAX_CALL_DEPTH};
    use crate::context::{BattleResult, ChoiceOutcome, ContextHandle, GameContext, SceneRequest};
    use crate::events::EventCollection;
    use crate::script::ScriptHost;

    fn cmd(code: u16, indent: u16, params: Vec<Value>) -> Command {
        Command::new(code, indent, params)
    }

    fn nop(indent: u16) -> Command {
        cmd(0, indent, Vec::new())
    }

    fn set_switch(index: u32, indent: u16) -> Command {
        cmd(121, indent, vec![json!(index), json!(index), json!(true)])
    }

    fn program(commands: Vec<Command>) -> Program {
        Rc::from(commands)
    }

    fn interp() -> Interpreter {
        interp_with(EventCollection::empty())
    }

    fn interp_with(collection: EventCollection) -> Interpreter {
        let context = ContextHandle::new(GameContext::new(false));
        let script = Rc::new(ScriptHost::new(context.clone()).expect("lua host initialises"));
        Interpreter::new(context, script, Rc::new(collection))
    }

    #[test]
    fn budget_forces_exactly_three_updates_for_250_commands() {
        let mut vm = interp();
        let commands: Vec<Command> = (0..250).map(|_| nop(0)).collect();
        vm.setup(program(commands), None);

        vm.update();
        assert!(vm.is_running(), "first tick must stop at the budget");
        assert_eq!(vm.index, COMMANDS_PER_TICK);
        vm.update();
        assert!(vm.is_running(), "second tick must stop at the budget");
        vm.update();
        assert!(!vm.is_running(), "third tick drains the remaining 50");
    }

    #[test]
    fn skip_lands_on_the_next_sibling() {
        // [A(0), B(1), C(1), D(0)]: a skip issued at B for level 0 must put
        // the next executed command at D.
        let mut vm = interp();
        let list = program(vec![nop(0), nop(1), nop(1), nop(0)]);
        vm.setup(list.clone(), None);
        vm.index = 1;
        vm.skip_to_sibling(&list, 0);
        // The regular post-command advance performs the final step.
        vm.index += 1;
        assert_eq!(vm.index, 3);
    }

    #[test]
    fn conditional_branch_runs_exactly_one_arm() {
        let list = vec![
            cmd(111, 0, vec![json!(0), json!(1), json!(true)]),
            set_switch(10, 1),
            cmd(411, 0, Vec::new()),
            set_switch(11, 1),
            cmd(412, 0, Vec::new()),
        ];

        // Switch 1 on: the if-arm runs.
        let mut vm = interp();
        vm.context.set_switch(1, true);
        vm.setup(program(list.clone()), None);
        vm.update();
        assert!(!vm.is_running());
        assert!(vm.context.switch(10));
        assert!(!vm.context.switch(11));

        // Switch 1 off: the else-arm runs.
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(11));
        assert!(!vm.context.switch(10));
    }

    #[test]
    fn branch_entry_is_consumed_after_the_construct() {
        let list = vec![
            cmd(111, 0, vec![json!(0), json!(1), json!(true)]),
            nop(1),
            cmd(411, 0, Vec::new()),
            nop(1),
            cmd(412, 0, Vec::new()),
        ];
        let mut vm = interp();
        vm.context.set_switch(1, true);
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.branch.is_empty());
    }

    #[test]
    fn loop_repeats_until_break() {
        let list = vec![
            cmd(112, 0, Vec::new()),
            cmd(122, 1, vec![json!(1), json!(1), json!(1), json!(0), json!(1)]),
            cmd(111, 1, vec![json!(1), json!(1), json!(0), json!(3), json!(1)]),
            cmd(113, 2, Vec::new()),
            cmd(412, 1, Vec::new()),
            cmd(413, 0, Vec::new()),
            set_switch(5, 0),
        ];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(!vm.is_running());
        assert_eq!(vm.context.variable(1), 3);
        assert!(vm.context.switch(5));
    }

    #[test]
    fn jump_scans_forward_only() {
        let list = vec![
            cmd(119, 0, vec![json!("end")]),
            set_switch(5, 0),
            cmd(118, 0, vec![json!("end")]),
            set_switch(6, 0),
        ];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(!vm.context.switch(5));
        assert!(vm.context.switch(6));
    }

    #[test]
    fn jump_to_missing_label_falls_through() {
        let list = vec![cmd(119, 0, vec![json!("nowhere")]), set_switch(5, 0)];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(5));
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line.starts_with("label.missing")));
    }

    #[test]
    fn wait_counter_halts_the_frame() {
        let list = vec![cmd(106, 0, vec![json!(3)]), set_switch(5, 0)];
        let mut vm = interp();
        vm.setup(program(list), None);
        for _ in 0..3 {
            vm.update();
            assert!(!vm.context.switch(5));
        }
        vm.update();
        assert!(vm.context.switch(5));
        assert!(!vm.is_running());
    }

    #[test]
    fn depth_cap_allows_one_hundred_nested_calls() {
        let mut root = interp();
        let list = program(vec![nop(0)]);
        let mut frame: &mut Interpreter = &mut root;
        for _ in 0..MAX_CALL_DEPTH {
            frame.launch_child(list.clone(), None);
            frame = frame.child.as_mut().expect("child just launched");
        }
    }

    #[test]
    #[should_panic(expected = "depth exceeded")]
    fn depth_cap_makes_the_101st_call_fatal() {
        let mut root = interp();
        let list = program(vec![nop(0)]);
        let mut frame: &mut Interpreter = &mut root;
        for _ in 0..=MAX_CALL_DEPTH {
            frame.launch_child(list.clone(), None);
            frame = frame.child.as_mut().expect("child just launched");
        }
    }

    #[test]
    fn message_suspends_until_the_widget_completes() {
        let list = vec![
            cmd(101, 0, vec![json!(r"Hello \v[7]")]),
            cmd(401, 0, vec![json!("second line")]),
            set_switch(5, 0),
        ];
        let mut vm = interp();
        vm.context.set_variable(7, 42);
        vm.setup(program(list), None);

        vm.update();
        let prompt = vm.context.message().expect("prompt published");
        assert_eq!(prompt.lines, vec!["Hello 42".to_string(), "second line".to_string()]);
        assert!(!vm.context.switch(5), "frame is suspended behind the prompt");

        vm.update();
        assert!(!vm.context.switch(5));

        vm.context.complete_message(None);
        vm.update();
        assert!(vm.context.switch(5));
        assert!(!vm.is_running());
    }

    #[test]
    fn choice_selection_picks_the_matching_case() {
        let list = vec![
            cmd(102, 0, vec![json!(["fight", "flee"]), json!(true)]),
            cmd(402, 0, vec![json!(0)]),
            set_switch(10, 1),
            cmd(402, 0, vec![json!(1)]),
            set_switch(11, 1),
            cmd(403, 0, Vec::new()),
            set_switch(12, 1),
            cmd(404, 0, Vec::new()),
        ];
        let mut vm = interp();
        vm.setup(program(list.clone()), None);
        vm.update();
        assert!(vm.context.message_pending());
        vm.context.complete_message(Some(ChoiceOutcome::Chosen(1)));
        vm.update();
        assert!(!vm.context.switch(10));
        assert!(vm.context.switch(11));
        assert!(!vm.context.switch(12));
        assert!(vm.branch.is_empty());

        // Cancel takes the cancel case.
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        vm.context.complete_message(Some(ChoiceOutcome::Canceled));
        vm.update();
        assert!(vm.context.switch(12));
        assert!(!vm.context.switch(10));
        assert!(!vm.context.switch(11));
    }

    #[test]
    fn battle_result_routes_to_the_matching_case() {
        let list = vec![
            cmd(301, 0, vec![json!(7)]),
            cmd(601, 0, Vec::new()),
            set_switch(10, 1),
            cmd(603, 0, Vec::new()),
            set_switch(11, 1),
            cmd(604, 0, Vec::new()),
        ];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert_eq!(
            vm.context.take_scene_request(),
            Some(SceneRequest::Battle { troop_id: 7 })
        );
        // Scene still active: the frame stays put.
        vm.update();
        assert!(vm.is_running());
        vm.context.complete_battle(BattleResult::Lose);
        vm.update();
        assert!(!vm.context.switch(10));
        assert!(vm.context.switch(11));
        assert!(!vm.is_running());
    }

    #[test]
    fn number_input_suspends_and_writes_the_variable() {
        let list = vec![cmd(103, 0, vec![json!(3), json!(4)]), set_switch(5, 0)];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.number_input_pending());
        assert!(!vm.context.switch(5));
        vm.context.complete_number_input(1234);
        vm.update();
        assert_eq!(vm.context.variable(3), 1234);
        assert!(vm.context.switch(5));
    }

    #[test]
    fn call_common_event_runs_in_a_child_frame() {
        let common = CommonEvent {
            id: 9,
            name: "grant".to_string(),
            trigger: CommonEventTrigger::None,
            commands: vec![set_switch(21, 0)],
        };
        let mut vm = interp_with(EventCollection::from_parts(Vec::new(), vec![common]));
        let list = vec![cmd(117, 0, vec![json!(9)]), set_switch(22, 0)];
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(21));
        assert!(vm.context.switch(22));
        assert!(!vm.is_running());
    }

    #[test]
    fn unknown_common_event_is_a_logged_no_op() {
        let mut vm = interp();
        let list = vec![cmd(117, 0, vec![json!(404)]), set_switch(5, 0)];
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(5));
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line.starts_with("event.unknown_common")));
    }

    #[test]
    fn variable_arithmetic_is_clamped() {
        let list = vec![
            cmd(122, 0, vec![json!(1), json!(1), json!(0), json!(0), json!(50_000_000)]),
            cmd(122, 0, vec![json!(1), json!(1), json!(3), json!(0), json!(1000)]),
        ];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert_eq!(vm.context.variable(1), 99_999_999);
    }

    #[test]
    fn script_command_error_is_recoverable() {
        let list = vec![cmd(355, 0, vec![json!("vm.no_such_function()")]), set_switch(5, 0)];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(5));
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line.starts_with("script.error")));
    }

    #[test]
    fn script_command_continuation_lines_join() {
        let list = vec![
            cmd(355, 0, vec![json!("vm.set_switch(8,")]),
            cmd(655, 0, vec![json!("true)")]),
        ];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(8));
    }

    #[test]
    fn script_condition_drives_the_branch() {
        let list = vec![
            cmd(111, 0, vec![json!(12), json!("vm.get_variable(2) == 5")]),
            set_switch(10, 1),
            cmd(412, 0, Vec::new()),
        ];
        let mut vm = interp();
        vm.context.set_variable(2, 5);
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(10));
    }

    #[test]
    fn raising_condition_counts_as_false() {
        let list = vec![
            cmd(111, 0, vec![json!(12), json!("error('boom')")]),
            set_switch(10, 1),
            cmd(412, 0, Vec::new()),
            set_switch(11, 0),
        ];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(!vm.context.switch(10));
        assert!(vm.context.switch(11));
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line.starts_with("condition.error")));
    }

    #[test]
    fn local_switch_commands_need_an_invoking_event() {
        let list = vec![cmd(123, 0, vec![json!("A"), json!(true)])];
        let mut vm = interp();
        vm.setup(program(list.clone()), None);
        vm.update();
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line.starts_with("command.no_event")));

        let mut vm = interp();
        vm.setup(program(list), Some(4));
        vm.update();
        assert!(vm.context.local_switch(&(0, 4, "A".to_string())));
    }

    #[test]
    fn map_change_nulls_the_invoking_event() {
        let list = vec![
            cmd(106, 0, vec![json!(1)]),
            cmd(123, 0, vec![json!("A"), json!(true)]),
        ];
        let mut vm = interp();
        vm.context.set_map_id(1);
        vm.setup(program(list), Some(4));
        vm.update();
        vm.context.set_map_id(2);
        vm.update();
        vm.update();
        assert!(!vm.context.local_switch(&(1, 4, "A".to_string())));
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line.starts_with("command.no_event")));
    }

    #[test]
    fn auto_event_starts_when_its_condition_holds() {
        let map = MapFile {
            id: 1,
            name: "plaza".to_string(),
            events: vec![ember_formats::MapEvent {
                id: 2,
                name: "greeter".to_string(),
                trigger: ember_formats::EventTrigger::Auto,
                condition: ember_formats::EventCondition {
                    switch_id: Some(30),
                    local_switch: None,
                },
                commands: vec![
                    cmd(121, 0, vec![json!(30), json!(30), json!(false)]),
                    set_switch(40, 0),
                ],
            }],
        };
        let mut vm = interp_with(EventCollection::from_parts(vec![map], Vec::new()));
        vm.context.set_map_id(1);
        vm.update();
        assert!(!vm.context.switch(40), "condition off, nothing starts");

        vm.context.set_switch(30, true);
        vm.update();
        assert!(vm.context.switch(40));
        assert!(!vm.context.switch(30), "program turned its trigger off");
        assert!(!vm.context.is_event_locked(1, 2), "trigger unlocked at end");
    }

    #[test]
    fn queued_starting_event_runs_before_auto_scan() {
        let map = MapFile {
            id: 1,
            name: "plaza".to_string(),
            events: vec![ember_formats::MapEvent {
                id: 3,
                name: "sign".to_string(),
                trigger: ember_formats::EventTrigger::Action,
                condition: ember_formats::EventCondition::default(),
                commands: vec![set_switch(41, 0)],
            }],
        };
        let mut vm = interp_with(EventCollection::from_parts(vec![map], Vec::new()));
        vm.context.set_map_id(1);
        vm.context.push_starting_event(3);
        vm.update();
        assert!(vm.context.switch(41));
    }

    #[test]
    fn pending_common_event_request_wins_the_scan() {
        let common = CommonEvent {
            id: 5,
            name: "cutscene".to_string(),
            trigger: CommonEventTrigger::None,
            commands: vec![set_switch(42, 0)],
        };
        let mut vm = interp_with(EventCollection::from_parts(Vec::new(), vec![common]));
        vm.context.request_common_event(5);
        vm.update();
        assert!(vm.context.switch(42));
    }

    #[test]
    fn erase_event_excludes_it_from_future_scans() {
        let list = vec![cmd(116, 0, Vec::new())];
        let mut vm = interp();
        vm.context.set_map_id(1);
        vm.setup(program(list), Some(6));
        vm.update();
        assert!(vm.context.is_event_erased(1, 6));
    }

    #[test]
    fn coroutine_frame_yields_and_resumes_across_ticks() {
        let mut vm = interp();
        vm.setup_script("message('hi')\nvm.set_switch(5, true)", "demo", None);
        assert!(vm.is_running());

        vm.update();
        assert!(vm.context.message_pending());
        assert!(!vm.context.switch(5));

        vm.context.complete_message(None);
        vm.update();
        assert!(vm.context.switch(5));
        assert!(!vm.is_running());
    }

    #[test]
    fn coroutine_wait_transfers_to_the_frame_counter() {
        let mut vm = interp();
        vm.setup_script("wait(2)\nvm.set_switch(6, true)", "pause", None);
        vm.update();
        assert!(!vm.context.switch(6));
        vm.update();
        vm.update();
        assert!(!vm.context.switch(6));
        vm.update();
        assert!(vm.context.switch(6));
        assert!(!vm.is_running());
    }

    #[test]
    #[should_panic(expected = "already active")]
    fn starting_a_second_coroutine_is_fatal() {
        let mut vm = interp();
        vm.setup_script("coroutine.yield()", "first", None);
        vm.setup_script("coroutine.yield()", "second", None);
    }

    #[test]
    fn unknown_opcode_is_a_logged_no_op() {
        let list = vec![cmd(9999, 0, Vec::new()), set_switch(5, 0)];
        let mut vm = interp();
        vm.setup(program(list), None);
        vm.update();
        assert!(vm.context.switch(5));
        assert!(vm
            .context
            .events()
            .iter()
            .any(|line| line == "command.unknown code=9999"));
    }

    #[test]
    fn exit_event_processing_ends_only_the_current_frame() {
        let common = CommonEvent {
            id: 9,
            name: "bail".to_string(),
            trigger: CommonEventTrigger::None,
            commands: vec![cmd(115, 0, Vec::new()), set_switch(21, 0)],
        };
        let mut vm = interp_with(EventCollection::from_parts(Vec::new(), vec![common]));
        let list = vec![cmd(117, 0, vec![json!(9)]), set_switch(22, 0)];
        vm.setup(program(list), None);
        vm.update();
        assert!(!vm.context.switch(21), "child exited before its second command");
        assert!(vm.context.switch(22), "parent resumed after the child");
    }
}
