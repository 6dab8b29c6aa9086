pub mod cli;
pub mod context;
pub mod events;
pub mod interpreter;
pub mod ops;
pub mod runtime;
pub mod script;

pub use context::{
    AnimationRequest, BattleResult, ChoiceOutcome, ContextHandle, GameContext, LocalValue,
    LocalVarOp, MessagePrompt, NumberInput, PathRouteRequest, SceneRequest, StateSnapshot,
    VARIABLE_LIMIT,
};
pub use events::EventCollection;
pub use interpreter::{Interpreter, COMMANDS_PER_TICK, MAX_CALL_DEPTH};
pub use ops::Op;
pub use runtime::GameRuntime;
pub use script::{ScriptError, ScriptHost, ScriptTask, TaskStep};
