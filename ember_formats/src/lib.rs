pub mod event;
pub mod switches;

pub use event::{
    load_common_events, validate_program, Command, CommonEvent, CommonEventTrigger,
    EventCondition, EventTrigger, MapEvent, MapFile, Program,
};
pub use switches::{pack_switches, unpack_switches, SwitchBlock};
