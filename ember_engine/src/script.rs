use mlua::{
    Lua, LuaOptions, MultiValue, RegistryKey, StdLib, Thread, ThreadStatus, Value as LuaValue,
};
use thiserror::Error;

use crate::context::{ContextHandle, LocalVarOp, SceneRequest};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("unknown local variable op `{0}`")]
    UnknownLocalOp(String),
}

/// Blocking-looking helpers available to authored script code. Each one
/// publishes through the `vm` table and yields until the relevant flag
/// clears, so sequential script code suspends transparently across ticks.
const PRELUDE: &str = r#"
function message(text)
    vm.show_message(text)
    while vm.message_pending() do
        coroutine.yield()
    end
end

function choice(text, options, cancelable)
    vm.show_choices(text, options, cancelable or false)
    while vm.message_pending() do
        coroutine.yield()
    end
    return vm.take_choice()
end

function wait(ticks)
    vm.request_wait(ticks)
    coroutine.yield()
end
"#;

/// One live coroutine. The thread lives in the Lua registry so the frame can
/// keep the handle across ticks without borrowing the Lua state.
#[derive(Debug)]
pub struct ScriptTask {
    label: String,
    thread: RegistryKey,
}

impl ScriptTask {
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    Yielded,
    Completed,
}

/// Owns the Lua state and the `vm` callback surface. One host serves every
/// frame; tasks are independent registry-keyed threads.
pub struct ScriptHost {
    lua: Lua,
    context: ContextHandle,
}

impl ScriptHost {
    pub fn new(context: ContextHandle) -> Result<Self, ScriptError> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        install_vm_table(&lua, &context)?;
        lua.load(PRELUDE).set_name("prelude").exec()?;
        Ok(ScriptHost { lua, context })
    }

    /// Compiles authored script source into a fresh coroutine.
    pub fn start_task(&self, source: &str, label: &str) -> Result<ScriptTask, ScriptError> {
        let func = self.lua.load(source).set_name(label).into_function()?;
        let thread = self.lua.create_thread(func)?;
        let key = self.lua.create_registry_value(thread)?;
        self.context.log_event(format!("script.start {label}"));
        Ok(ScriptTask {
            label: label.to_string(),
            thread: key,
        })
    }

    /// Resumes a task once. Errors raised by the script kill only that task:
    /// they are logged and reported as completion.
    pub fn resume(&self, task: &ScriptTask) -> TaskStep {
        let thread: Thread = match self.lua.registry_value(&task.thread) {
            Ok(thread) => thread,
            Err(err) => {
                self.context
                    .log_event(format!("script.error {}: {err}", task.label));
                return TaskStep::Completed;
            }
        };
        if !matches!(thread.status(), ThreadStatus::Resumable) {
            return TaskStep::Completed;
        }
        match thread.resume::<_, MultiValue>(()) {
            Ok(_) => match thread.status() {
                ThreadStatus::Resumable => TaskStep::Yielded,
                ThreadStatus::Unresumable | ThreadStatus::Error => {
                    self.context
                        .log_event(format!("script.complete {}", task.label));
                    TaskStep::Completed
                }
            },
            Err(err) => {
                self.context
                    .log_event(format!("script.error {}: {err}", task.label));
                TaskStep::Completed
            }
        }
    }

    /// Releases a finished task's registry slot.
    pub fn finish_task(&self, task: ScriptTask) {
        if let Err(err) = self.lua.remove_registry_value(task.thread) {
            self.context
                .log_event(format!("script.error {}: {err}", task.label));
        }
    }

    /// Evaluates an embedded condition expression to a truth value.
    pub fn eval_condition(&self, source: &str) -> Result<bool, ScriptError> {
        let value: LuaValue = self
            .lua
            .load(format!("return ({source})"))
            .set_name("condition")
            .eval()?;
        Ok(!matches!(value, LuaValue::Nil | LuaValue::Boolean(false)))
    }

    /// Executes an embedded statement chunk.
    pub fn eval_chunk(&self, source: &str) -> Result<(), ScriptError> {
        self.lua.load(source).set_name("script").exec()?;
        Ok(())
    }
}

fn install_vm_table(lua: &Lua, context: &ContextHandle) -> mlua::Result<()> {
    let vm = lua.create_table()?;

    let ctx = context.clone();
    vm.set(
        "get_switch",
        lua.create_function(move |_, index: u32| Ok(ctx.switch(index)))?,
    )?;
    let ctx = context.clone();
    vm.set(
        "set_switch",
        lua.create_function(move |_, (index, on): (u32, bool)| {
            ctx.set_switch(index, on);
            Ok(())
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "get_variable",
        lua.create_function(move |_, index: u32| Ok(ctx.variable(index)))?,
    )?;
    // The variable store is integer-only; a fractional or non-numeric value
    // raises here instead of being truncated into the store.
    let ctx = context.clone();
    vm.set(
        "set_variable",
        lua.create_function(move |_, (index, value): (u32, LuaValue)| {
            let value = match value {
                LuaValue::Integer(int) => int,
                LuaValue::Number(number) if number.is_finite() && number.fract() == 0.0 => {
                    number as i64
                }
                other => {
                    return Err(mlua::Error::external(format!(
                        "variable {} expects an integer, got {}",
                        index,
                        other.type_name()
                    )))
                }
            };
            ctx.set_variable(index, value);
            Ok(())
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "get_local_switch",
        lua.create_function(move |_, (map, event, label): (u32, u32, String)| {
            Ok(ctx.local_switch(&(map, event, label)))
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "set_local_switch",
        lua.create_function(move |_, (map, event, label, on): (u32, u32, String, bool)| {
            ctx.set_local_switch((map, event, label), on);
            Ok(())
        })?,
    )?;
    // Nil for an untouched key, the integer view of the value otherwise.
    let ctx = context.clone();
    vm.set(
        "local_var",
        lua.create_function(move |_, (map, event, key): (u32, u32, String)| {
            Ok(ctx
                .local_variable(&(map, event, key))
                .map(|value| value.as_int()))
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "local_var_apply",
        lua.create_function(
            move |_, (map, event, key, op, operand): (u32, u32, String, String, Option<i64>)| {
                let op = LocalVarOp::parse(&op)
                    .ok_or_else(|| mlua::Error::external(ScriptError::UnknownLocalOp(op)))?;
                Ok(ctx
                    .local_variable_apply((map, event, key), op, operand.unwrap_or(0))
                    .map(|value| value.as_int()))
            },
        )?,
    )?;
    let ctx = context.clone();
    vm.set(
        "show_message",
        lua.create_function(move |_, text: String| {
            ctx.show_message(vec![text], Vec::new(), false);
            Ok(())
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "show_choices",
        lua.create_function(
            move |_, (text, options, cancelable): (Option<String>, Vec<String>, Option<bool>)| {
                let lines = text.map(|line| vec![line]).unwrap_or_default();
                ctx.show_message(lines, options, cancelable.unwrap_or(false));
                Ok(())
            },
        )?,
    )?;
    let ctx = context.clone();
    vm.set(
        "message_pending",
        lua.create_function(move |_, ()| Ok(ctx.message_pending()))?,
    )?;
    // Chosen index (zero-based) or -1 for cancel; nil when no outcome is
    // waiting.
    let ctx = context.clone();
    vm.set(
        "take_choice",
        lua.create_function(move |_, ()| {
            Ok(ctx.take_choice_result().map(|outcome| match outcome {
                crate::context::ChoiceOutcome::Chosen(index) => index as i64,
                crate::context::ChoiceOutcome::Canceled => -1,
            }))
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "request_wait",
        lua.create_function(move |_, ticks: u32| {
            ctx.request_script_wait(ticks);
            Ok(())
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "request_scene",
        lua.create_function(move |_, name: String| {
            let request = match name.as_str() {
                "menu" => SceneRequest::Menu,
                "save" => SceneRequest::Save,
                "game_over" => SceneRequest::GameOver,
                other => {
                    ctx.log_event(format!("scene.unknown {other}"));
                    return Ok(());
                }
            };
            ctx.request_scene(request);
            Ok(())
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "request_common_event",
        lua.create_function(move |_, id: u32| {
            ctx.request_common_event(id);
            Ok(())
        })?,
    )?;
    let ctx = context.clone();
    vm.set(
        "log",
        lua.create_function(move |_, text: String| {
            ctx.log_event(text);
            Ok(())
        })?,
    )?;

    lua.globals().set("vm", vm)
}
