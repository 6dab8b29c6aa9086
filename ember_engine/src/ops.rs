/// Decoded command vocabulary. Numeric codes follow the authoring tool's
/// classic numbering; decoding happens once when a program is loaded into a
/// frame, so the hot loop never re-parses codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// End-of-block padding emitted by the authoring tool.
    Nop,
    ShowMessage,
    MessageLine,
    ShowChoices,
    ChoiceCase,
    ChoiceCancelCase,
    ChoicesEnd,
    NumberInput,
    Wait,
    ConditionalBranch,
    Else,
    BranchEnd,
    LoopHead,
    Repeat,
    BreakLoop,
    ExitProgram,
    EraseEvent,
    CallCommonEvent,
    Label,
    JumpToLabel,
    ControlSwitches,
    ControlVariables,
    ControlLocalSwitch,
    LocalVariableOp,
    ShowAnimation,
    SetPathRoute,
    WaitForPath,
    BattleProcessing,
    BattleWinCase,
    BattleEscapeCase,
    BattleLoseCase,
    BattleEnd,
    ShopProcessing,
    NameEntry,
    CallMenu,
    CallSave,
    GameOver,
    Script,
    ScriptLine,
    Unknown(u16),
}

impl Op {
    pub fn from_code(code: u16) -> Op {
        match code {
            0 => Op::Nop,
            101 => Op::ShowMessage,
            401 => Op::MessageLine,
            102 => Op::ShowChoices,
            402 => Op::ChoiceCase,
            403 => Op::ChoiceCancelCase,
            404 => Op::ChoicesEnd,
            103 => Op::NumberInput,
            106 => Op::Wait,
            111 => Op::ConditionalBranch,
            411 => Op::Else,
            412 => Op::BranchEnd,
            112 => Op::LoopHead,
            413 => Op::Repeat,
            113 => Op::BreakLoop,
            115 => Op::ExitProgram,
            116 => Op::EraseEvent,
            117 => Op::CallCommonEvent,
            118 => Op::Label,
            119 => Op::JumpToLabel,
            121 => Op::ControlSwitches,
            122 => Op::ControlVariables,
            123 => Op::ControlLocalSwitch,
            357 => Op::LocalVariableOp,
            207 => Op::ShowAnimation,
            209 => Op::SetPathRoute,
            210 => Op::WaitForPath,
            301 => Op::BattleProcessing,
            601 => Op::BattleWinCase,
            602 => Op::BattleEscapeCase,
            603 => Op::BattleLoseCase,
            604 => Op::BattleEnd,
            302 => Op::ShopProcessing,
            303 => Op::NameEntry,
            351 => Op::CallMenu,
            352 => Op::CallSave,
            353 => Op::GameOver,
            355 => Op::Script,
            655 => Op::ScriptLine,
            other => Op::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Op;

    #[test]
    fn known_codes_decode() {
        assert_eq!(Op::from_code(101), Op::ShowMessage);
        assert_eq!(Op::from_code(413), Op::Repeat);
        assert_eq!(Op::from_code(355), Op::Script);
    }

    #[test]
    fn unknown_codes_are_preserved() {
        assert_eq!(Op::from_code(9999), Op::Unknown(9999));
    }
}
