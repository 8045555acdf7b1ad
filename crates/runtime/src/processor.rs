// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use ffscript_isa::instruction::Instruction;
use ffscript_program::program::Program;

use crate::context::TaskContext;
use crate::TaskError;

pub(crate) mod calling;
mod control_flow;
mod data;
mod scope;

// the outcome of one instruction.
pub enum HandleResult {
    // continue with the next instruction (the cursor was advanced by
    // the fetch already).
    Move,
    // continue at another position: a jump, a call or a return into
    // code.
    Jump(usize),
    // a call frame carrying a host-sentinel return address was popped;
    // the interpretation loop that pushed it ends here.
    End,
}

// drives the cursor until the frame that started this loop returns.
//
// calls may nest: a native callable can reenter script code, which runs
// this very loop again on the same context, bounded by the sentinel
// return address its entry frame carries.
pub fn interpret(context: &mut TaskContext, program: &Program) {
    loop {
        let position = context.pc;
        let instruction = match program.instruction(position) {
            Some(instruction) => instruction,
            None => {
                // running off the code image is a malformed program
                context.set_error(TaskError::InvalidAddress);
                break;
            }
        };
        context.pc = position + 1;

        let result = if context.is_error() {
            execute_on_error(instruction, context, program)
        } else {
            execute(instruction, context, program)
        };

        match result {
            HandleResult::Move => {}
            HandleResult::Jump(target) => context.pc = target,
            HandleResult::End => break,
        }
    }
}

pub(crate) fn execute(
    instruction: &Instruction,
    context: &mut TaskContext,
    program: &Program,
) -> HandleResult {
    match instruction {
        // data movement
        Instruction::WriteValue {
            source,
            value_size,
            target_offset,
        } => data::write_value(context, *source, *value_size, *target_offset),
        Instruction::WriteValueFromOffset {
            source_offset,
            value_size,
            target_offset,
        } => data::write_value_from_offset(context, *source_offset, *value_size, *target_offset),
        Instruction::WriteValueToRef {
            source_offset,
            value_size,
            target_ref_offset,
        } => data::write_value_to_ref(context, *source_offset, *value_size, *target_ref_offset),
        Instruction::LeaAddressToAddress { source, target } => {
            data::lea_address_to_address(context, *source, *target)
        }
        Instruction::LeaAddressToOffset {
            source,
            target_offset,
        } => data::lea_address_to_offset(context, *source, *target_offset),
        Instruction::LeaOffsetToAddress {
            source_offset,
            target,
        } => data::lea_offset_to_address(context, *source_offset, *target),
        Instruction::LeaOffsetToOffset {
            source_offset,
            target_offset,
        } => data::lea_offset_to_offset(context, *source_offset, *target_offset),

        // member access
        Instruction::ReadMemberValue {
            accessors,
            value_size,
            target_offset,
        } => data::read_member_value(context, accessors, *value_size, *target_offset),
        Instruction::LeaMemberAddress {
            accessors,
            target_offset,
        } => data::lea_member_address(context, accessors, *target_offset),

        // scope
        Instruction::EnterScope(enter) => scope::enter_scope(context, program, enter),
        Instruction::ExitScope(exit) => scope::exit_scope(context, program, exit),

        // control flow
        Instruction::Jump { target } => HandleResult::Jump(*target),
        Instruction::JumpIf {
            condition_offset,
            target,
        } => control_flow::jump_if(context, *condition_offset, *target),
        Instruction::JumpIfElse {
            condition_offset,
            target_true,
            target_false,
        } => control_flow::jump_if_else(context, *condition_offset, *target_true, *target_false),
        Instruction::Break { unwind, target } | Instruction::Continue { unwind, target } => {
            control_flow::unwind_and_jump(context, program, unwind, *target)
        }
        Instruction::ExitFunctionAtReturn(exit) => {
            control_flow::exit_function_at_return(context, program, exit)
        }
        Instruction::ExitFunctionAtEnd => control_flow::exit_function_at_end(context),

        // calls
        Instruction::CallNative(call) => calling::call_native(context, program, call),
        Instruction::CallNativeWithAssist(call) => {
            calling::call_native_with_assist(context, program, call)
        }
        Instruction::CallDynamic(call) => calling::call_dynamic(context, program, call),
        Instruction::CallScript(call) => calling::call_script(context, call),
        Instruction::CallScriptLinked(call) => calling::call_script_linked(context, call),
        Instruction::CallScriptNested(call) => calling::call_script_nested(context, program, call),
        Instruction::Forwarder(forward) => calling::forward_call(context, program, forward),

        // lambda creation
        Instruction::CreateLambda(create) => calling::create_lambda(context, create),

        Instruction::RetrieveFunctionResult {
            result_size,
            target_offset,
        } => calling::retrieve_function_result(context, *result_size, *target_offset),
    }
}

// the error-aware skip: once the task error flag is set, only the
// structural instructions run, so the cursor walks linearly to each
// scope's exit, destructors of completed constructors run, and the
// function unwinds through its epilogue. everything else is a no-op.
fn execute_on_error(
    instruction: &Instruction,
    context: &mut TaskContext,
    program: &Program,
) -> HandleResult {
    match instruction {
        Instruction::EnterScope(enter) => scope::enter_scope(context, program, enter),
        Instruction::ExitScope(exit) => scope::exit_scope(context, program, exit),
        Instruction::ExitFunctionAtEnd => control_flow::exit_function_at_end(context),
        _ => HandleResult::Move,
    }
}

// runs the commands of an auto-run entry or a pre-built unwind list.
// these lists are executed even while the error flag is set (they carry
// the destructors), and they contain no control transfer, a jump inside
// one is a malformed program.
pub(crate) fn run_command_list(
    commands: &[Instruction],
    context: &mut TaskContext,
    program: &Program,
) {
    for command in commands {
        match execute(command, context, program) {
            HandleResult::Move => {}
            HandleResult::Jump(_) | HandleResult::End => {
                context.set_error(TaskError::InvalidAddress);
                break;
            }
        }
    }
}

pub(crate) fn fail(context: &mut TaskContext, error: TaskError) -> HandleResult {
    context.set_error(error);
    HandleResult::Move
}
