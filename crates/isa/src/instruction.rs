// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use std::ffi::CString;

use smallvec::SmallVec;

use crate::{accessor::MemberAccessor, format_address, HostMutPtr, HostPtr};

// member-access chains and assist-info lists are almost always short.
pub type AccessorChain = SmallVec<[MemberAccessor; 4]>;
pub type AssistPairs = SmallVec<[AssistPair; 4]>;

// before a native call, the engine stores the absolute address of
// `source_offset` into the slot at `pointer_slot_offset`, so that
// host-language reference parameters observe a stable address for the
// duration of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistPair {
    pub source_offset: i32,
    pub pointer_slot_offset: i32,
}

// one constructor or destructor of a scope's auto-run list.
//
// `slot` indexes the completion bitset of the owning scope; `commands`
// stages the parameter address(es) and performs the call. the engine
// marks `slot` completed after the commands ran without error (entry
// list), and runs the commands only while `slot` is still marked (exit
// list).
#[derive(Debug)]
pub struct AutoRunEntry {
    pub slot: u32,
    pub commands: Vec<Instruction>,
}

#[derive(Debug)]
pub struct EnterScopeData {
    pub data_size: u32,
    pub code_size: u32,
    // length of the completion bitset; entry slots index into it.
    pub constructor_count: u32,
    pub constructors: Vec<AutoRunEntry>,
}

#[derive(Debug)]
pub struct ExitScopeData {
    pub data_size: u32,
    pub code_size: u32,
    // the function body scope exits with `restore_call` false: the
    // epilogue pops its frame instead, after the result has been moved out.
    pub restore_call: bool,
    // emitted in reverse declaration order by the compiler.
    pub destructors: Vec<AutoRunEntry>,
}

#[derive(Debug)]
pub struct CallNativeData {
    pub function_name: String,
    pub function_id: u32,
    pub result_offset: i32,
    pub begin_param_offset: i32,
}

#[derive(Debug)]
pub struct CallNativeAssistData {
    pub call: CallNativeData,
    pub assist_pairs: AssistPairs,
}

// type description of one dynamic-call argument, packed into a
// `SimpleVariant` at call time.
#[derive(Debug)]
pub struct DynamicParam {
    pub source_offset: i32,
    pub script_type: i32,
    pub type_name: CString,
    pub size: i32,
}

#[derive(Debug)]
pub struct CallDynamicData {
    pub call: CallNativeData,
    pub params: Vec<DynamicParam>,
}

// the plain script call: the callee frame starts with the result region
// itself, the caller consumes it afterwards with `RetrieveFunctionResult`.
#[derive(Debug)]
pub struct CallScriptData {
    pub function_name: String,
    pub entry: usize,
    pub result_size: u32,
    pub begin_param_offset: i32,
    pub param_size: u32,
}

// the linked script call: the callee's reserved return-address slot
// receives the absolute address of the caller's result slot, the callee
// writes the result through it.
#[derive(Debug)]
pub struct CallScriptLinkedData {
    pub function_name: String,
    pub entry: usize,
    pub result_offset: i32,
    pub begin_param_offset: i32,
    pub param_size: u32,
}

#[derive(Debug)]
pub struct ForwarderData {
    pub info_offset: i32,
    pub result_offset: i32,
    pub begin_param_offset: i32,
    pub param_size: u32,
}

#[derive(Debug)]
pub struct CreateLambdaData {
    pub result_offset: i32,
    // byte range of the current frame to capture.
    pub source_offset: i32,
    pub capture_size: u32,
    // entry position of the anonymous function.
    pub entry: usize,
    // where the capture lands in the callee frame, assigned by the compiler.
    pub capture_target_offset: u32,
}

#[derive(Debug)]
pub struct ExitFunctionData {
    // completion-bitset slot of the named local being returned; its
    // destructor is suppressed because the caller's result slot now
    // aliases that location.
    pub elide_slot: Option<u32>,
    // pre-built scope exits for every scope open at the return point,
    // innermost first.
    pub unwind: Vec<Instruction>,
}

// The instruction set of the VM.
//
// instructions are produced once by the compiler and then only read; the
// engine dispatches on the variant tag. multi-command instructions
// (`Break`, `Continue`, `ExitFunctionAtReturn` and the scope pair) own
// their sub-lists, the lists are transferred from the compiler when a
// scope is finalized, never aliased.
#[derive(Debug)]
pub enum Instruction {
    // data movement
    WriteValue {
        source: HostPtr,
        value_size: u32,
        target_offset: i32,
    },
    WriteValueFromOffset {
        source_offset: i32,
        value_size: u32,
        target_offset: i32,
    },
    // follow the pointer stored at `target_ref_offset`, then write.
    WriteValueToRef {
        source_offset: i32,
        value_size: u32,
        target_ref_offset: i32,
    },
    LeaAddressToAddress {
        source: HostPtr,
        target: HostMutPtr,
    },
    LeaAddressToOffset {
        source: HostPtr,
        target_offset: i32,
    },
    LeaOffsetToAddress {
        source_offset: i32,
        target: HostMutPtr,
    },
    LeaOffsetToOffset {
        source_offset: i32,
        target_offset: i32,
    },

    // member access
    ReadMemberValue {
        accessors: AccessorChain,
        value_size: u32,
        target_offset: i32,
    },
    LeaMemberAddress {
        accessors: AccessorChain,
        target_offset: i32,
    },

    // scope
    EnterScope(Box<EnterScopeData>),
    ExitScope(Box<ExitScopeData>),

    // control flow
    Jump {
        target: usize,
    },
    JumpIf {
        condition_offset: i32,
        target: usize,
    },
    JumpIfElse {
        condition_offset: i32,
        target_true: usize,
        target_false: usize,
    },
    // pre-built destructor runs for every scope between the current
    // point and the loop boundary, then a jump out of the loop.
    Break {
        unwind: Vec<Instruction>,
        target: usize,
    },
    // as `Break`, but the jump lands on the loop condition.
    Continue {
        unwind: Vec<Instruction>,
        target: usize,
    },
    ExitFunctionAtReturn(Box<ExitFunctionData>),
    ExitFunctionAtEnd,

    // calls
    CallNative(Box<CallNativeData>),
    CallNativeWithAssist(Box<CallNativeAssistData>),
    CallDynamic(Box<CallDynamicData>),
    CallScript(Box<CallScriptData>),
    CallScriptLinked(Box<CallScriptLinkedData>),
    // as linked, but the sub-interpretation is driven to completion
    // before the instruction finishes. lambda invocations share this
    // path through the forwarder, adding the capture copy.
    CallScriptNested(Box<CallScriptLinkedData>),
    // reads a `RuntimeFunctionInfo` from a slot and routes the call to
    // the native, script or lambda handling.
    Forwarder(Box<ForwarderData>),

    // lambda creation
    CreateLambda(Box<CreateLambdaData>),

    // copies from the implicit result position (top of the current
    // frame) into a target slot; pairs with the plain `CallScript`.
    RetrieveFunctionResult {
        result_size: u32,
        target_offset: i32,
    },
}

impl Instruction {
    // renders the disassembly of this instruction, one line per command.
    // this is the text the debugger front end shows; the grammar is part
    // of the engine contract.
    pub fn describe(&self, lines: &mut Vec<String>) {
        match self {
            Instruction::WriteValue {
                source,
                value_size,
                target_offset,
            } => {
                lines.push(format!(
                    "write({}, {}, [{}])",
                    format_address(source.as_usize()),
                    value_size,
                    target_offset
                ));
            }
            Instruction::WriteValueFromOffset {
                source_offset,
                value_size,
                target_offset,
            } => {
                lines.push(format!(
                    "write([{}], {}, [{}])",
                    source_offset, value_size, target_offset
                ));
            }
            Instruction::WriteValueToRef {
                source_offset,
                value_size,
                target_ref_offset,
            } => {
                lines.push(format!(
                    "write([{}], {}, |[{}]|)",
                    source_offset, value_size, target_ref_offset
                ));
            }
            Instruction::LeaAddressToAddress { source, target } => {
                lines.push(format!(
                    "lea({}, {})",
                    format_address(source.as_usize()),
                    format_address(target.as_usize())
                ));
            }
            Instruction::LeaAddressToOffset {
                source,
                target_offset,
            } => {
                lines.push(format!(
                    "lea({}, [{}])",
                    format_address(source.as_usize()),
                    target_offset
                ));
            }
            Instruction::LeaOffsetToAddress {
                source_offset,
                target,
            } => {
                lines.push(format!(
                    "lea([{}], {})",
                    source_offset,
                    format_address(target.as_usize())
                ));
            }
            Instruction::LeaOffsetToOffset {
                source_offset,
                target_offset,
            } => {
                lines.push(format!("lea([{}], [{}])", source_offset, target_offset));
            }
            Instruction::ReadMemberValue {
                accessors,
                value_size,
                target_offset,
            } => {
                describe_accessors(accessors, lines);
                lines.push(format!("write(REGISTER, {}, [{}])", value_size, target_offset));
            }
            Instruction::LeaMemberAddress {
                accessors,
                target_offset,
            } => {
                describe_accessors(accessors, lines);
                lines.push(format!("lea(REGISTER, [{}])", target_offset));
            }
            Instruction::EnterScope(data) => {
                lines.push(format!(
                    "allocate({}) - enter scope",
                    data.data_size + data.code_size
                ));
            }
            Instruction::ExitScope(data) => {
                lines.push(format!(
                    "unallocate({}) - exit scope",
                    data.data_size + data.code_size
                ));
            }
            Instruction::Jump { target } => {
                lines.push(format!("jmp({})", format_address(*target)));
            }
            Instruction::JumpIf {
                condition_offset,
                target,
            } => {
                lines.push(format!(
                    "jmp([{}], {})",
                    condition_offset,
                    format_address(*target)
                ));
            }
            Instruction::JumpIfElse {
                condition_offset,
                target_true,
                target_false,
            } => {
                lines.push(format!(
                    "jmp([{}], {}, {})",
                    condition_offset,
                    format_address(*target_true),
                    format_address(*target_false)
                ));
            }
            Instruction::Break { unwind, target }
            | Instruction::Continue { unwind, target } => {
                for command in unwind {
                    command.describe(lines);
                }
                lines.push(format!("jmp({})", format_address(*target)));
            }
            Instruction::ExitFunctionAtReturn(data) => {
                if let Some(slot) = data.elide_slot {
                    lines.push(format!("ignore_dtor({})", slot));
                }
                for command in &data.unwind {
                    command.describe(lines);
                }
                lines.push("return()".to_owned());
            }
            Instruction::ExitFunctionAtEnd => {
                lines.push("return()".to_owned());
            }
            Instruction::CallNative(data) => {
                lines.push(format!(
                    "invoke({}, [{}], [{}])",
                    data.function_name, data.begin_param_offset, data.result_offset
                ));
            }
            Instruction::CallNativeWithAssist(data) => {
                lines.push(format!(
                    "invoke({}, [{}], [{}])",
                    data.call.function_name, data.call.begin_param_offset, data.call.result_offset
                ));
            }
            Instruction::CallDynamic(data) => {
                lines.push(format!(
                    "invoke({}, [{}], [{}])",
                    data.call.function_name, data.call.begin_param_offset, data.call.result_offset
                ));
            }
            Instruction::CallScript(data) => {
                lines.push(format!(
                    "invoke({}, [{}], {})",
                    data.function_name, data.begin_param_offset, data.param_size
                ));
            }
            Instruction::CallScriptLinked(data) | Instruction::CallScriptNested(data) => {
                lines.push(format!(
                    "invoke({}, [{}], {}, [{}])",
                    data.function_name, data.begin_param_offset, data.param_size, data.result_offset
                ));
            }
            Instruction::Forwarder(data) => {
                lines.push(format!(
                    "call([{}], [{}], {}, [{}])",
                    data.info_offset, data.begin_param_offset, data.param_size, data.result_offset
                ));
            }
            Instruction::CreateLambda(data) => {
                lines.push(format!(
                    "lambda({}, [{}], {}, [{}])",
                    format_address(data.entry),
                    data.source_offset,
                    data.capture_size,
                    data.result_offset
                ));
            }
            Instruction::RetrieveFunctionResult {
                result_size,
                target_offset,
            } => {
                lines.push(format!(
                    "write([<result>], {}, [{}])",
                    result_size, target_offset
                ));
            }
        }
    }
}

fn describe_accessors(accessors: &AccessorChain, lines: &mut Vec<String>) {
    for accessor in accessors {
        match accessor {
            MemberAccessor::ContextBase => {
                lines.push("lea([current_offset()], REGISTER)".to_owned());
            }
            MemberAccessor::Global(address) => {
                lines.push(format!("lea({}, REGISTER)", format_address(address.as_usize())));
            }
            MemberAccessor::Offset(distance) => {
                lines.push(format!("add(REGISTER, {})", distance));
            }
            MemberAccessor::Dereference => {
                lines.push("mov([REGISTER], REGISTER)".to_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    use crate::accessor::MemberAccessor;
    use crate::instruction::{
        CallNativeData, CallScriptLinkedData, EnterScopeData, ExitFunctionData, ExitScopeData,
        Instruction,
    };
    use crate::HostPtr;

    fn describe(instruction: &Instruction) -> Vec<String> {
        let mut lines = Vec::new();
        instruction.describe(&mut lines);
        lines
    }

    #[test]
    fn test_describe_data_movement() {
        assert_eq!(
            describe(&Instruction::WriteValueFromOffset {
                source_offset: 8,
                value_size: 4,
                target_offset: 24,
            }),
            vec!["write([8], 4, [24])"]
        );

        assert_eq!(
            describe(&Instruction::WriteValueToRef {
                source_offset: 8,
                value_size: 4,
                target_ref_offset: 0,
            }),
            vec!["write([8], 4, |[0]|)"]
        );

        assert_eq!(
            describe(&Instruction::LeaOffsetToOffset {
                source_offset: 12,
                target_offset: 16,
            }),
            vec!["lea([12], [16])"]
        );

        assert_eq!(
            describe(&Instruction::WriteValue {
                source: HostPtr::null(),
                value_size: 8,
                target_offset: 0,
            }),
            vec!["write(0x0, 8, [0])"]
        );
    }

    #[test]
    fn test_describe_scope_and_control_flow() {
        let enter = Instruction::EnterScope(Box::new(EnterScopeData {
            data_size: 24,
            code_size: 8,
            constructor_count: 0,
            constructors: vec![],
        }));
        assert_eq!(describe(&enter), vec!["allocate(32) - enter scope"]);

        let exit = Instruction::ExitScope(Box::new(ExitScopeData {
            data_size: 24,
            code_size: 8,
            restore_call: true,
            destructors: vec![],
        }));
        assert_eq!(describe(&exit), vec!["unallocate(32) - exit scope"]);

        assert_eq!(describe(&Instruction::Jump { target: 5 }), vec!["jmp(0x5)"]);
        assert_eq!(
            describe(&Instruction::JumpIfElse {
                condition_offset: 12,
                target_true: 3,
                target_false: 10,
            }),
            vec!["jmp([12], 0x3, 0xa)"]
        );
    }

    #[test]
    fn test_describe_return_with_elision() {
        let at_return = Instruction::ExitFunctionAtReturn(Box::new(ExitFunctionData {
            elide_slot: Some(0),
            unwind: vec![Instruction::ExitScope(Box::new(ExitScopeData {
                data_size: 16,
                code_size: 0,
                restore_call: false,
                destructors: vec![],
            }))],
        }));
        assert_eq!(
            describe(&at_return),
            vec!["ignore_dtor(0)", "unallocate(16) - exit scope", "return()"]
        );
    }

    #[test]
    fn test_describe_calls() {
        let native = Instruction::CallNative(Box::new(CallNativeData {
            function_name: "DefaultInteger".to_owned(),
            function_id: 0,
            result_offset: 16,
            begin_param_offset: 24,
        }));
        assert_eq!(describe(&native), vec!["invoke(DefaultInteger, [24], [16])"]);

        let linked = Instruction::CallScriptLinked(Box::new(CallScriptLinkedData {
            function_name: "test".to_owned(),
            entry: 2,
            result_offset: 16,
            begin_param_offset: 24,
            param_size: 4,
        }));
        assert_eq!(describe(&linked), vec!["invoke(test, [24], 4, [16])"]);
    }

    #[test]
    fn test_describe_member_access() {
        let read = Instruction::ReadMemberValue {
            accessors: smallvec![
                MemberAccessor::ContextBase,
                MemberAccessor::Offset(8),
                MemberAccessor::Dereference,
            ],
            value_size: 4,
            target_offset: 20,
        };
        assert_eq!(
            describe(&read),
            vec![
                "lea([current_offset()], REGISTER)",
                "add(REGISTER, 8)",
                "mov([REGISTER], REGISTER)",
                "write(REGISTER, 4, [20])"
            ]
        );
    }
}
