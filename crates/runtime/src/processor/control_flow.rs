// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use ffscript_isa::instruction::{ExitFunctionData, Instruction};
use ffscript_program::program::Program;

use crate::context::{ReturnAddress, TaskContext};
use crate::processor::{fail, run_command_list, HandleResult};

pub fn jump_if(context: &mut TaskContext, condition_offset: i32, target: usize) -> HandleResult {
    let condition = match context.absolute_address(condition_offset) {
        Ok(pointer) => unsafe { *pointer },
        Err(error) => return fail(context, error),
    };
    if condition != 0 {
        HandleResult::Jump(target)
    } else {
        HandleResult::Move
    }
}

pub fn jump_if_else(
    context: &mut TaskContext,
    condition_offset: i32,
    target_true: usize,
    target_false: usize,
) -> HandleResult {
    let condition = match context.absolute_address(condition_offset) {
        Ok(pointer) => unsafe { *pointer },
        Err(error) => return fail(context, error),
    };
    if condition != 0 {
        HandleResult::Jump(target_true)
    } else {
        HandleResult::Jump(target_false)
    }
}

// `Break` and `Continue`: run the pre-built scope exits between the
// current point and the loop boundary, then transfer.
pub fn unwind_and_jump(
    context: &mut TaskContext,
    program: &Program,
    unwind: &[Instruction],
    target: usize,
) -> HandleResult {
    run_command_list(unwind, context, program);
    HandleResult::Jump(target)
}

// `return` in the middle of a function: optionally suppress the
// destructor of the returned local, run the pre-built scope exits for
// every open scope, then the epilogue.
pub fn exit_function_at_return(
    context: &mut TaskContext,
    program: &Program,
    exit: &ExitFunctionData,
) -> HandleResult {
    if let Some(slot) = exit.elide_slot {
        if let Some(frame) = context.current_scope_frame_mut() {
            frame.runtime_data.mark_constructor_not_executed(slot);
        }
    }
    run_command_list(&exit.unwind, context, program);
    function_epilogue(context)
}

pub fn exit_function_at_end(context: &mut TaskContext) -> HandleResult {
    function_epilogue(context)
}

// pops the function body scope frame (its exit ran with restore-call
// false) and the call frame, then returns to the stored site. popping a
// host-sentinel frame ends the interpretation loop that pushed it.
fn function_epilogue(context: &mut TaskContext) -> HandleResult {
    if let Err(error) = context.pop_scope_frame() {
        context.set_error(error);
    }
    match context.pop_call_frame() {
        None => HandleResult::End,
        Some(frame) => match frame.return_address {
            ReturnAddress::Code(target) => HandleResult::Jump(target),
            ReturnAddress::Host(resume) => {
                context.pc = resume;
                HandleResult::End
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::context::{ReturnAddress, TaskContext};
    use crate::processor::control_flow::{exit_function_at_end, jump_if, jump_if_else};
    use crate::processor::HandleResult;

    #[test]
    fn test_jump_if_reads_condition_byte() {
        let mut context = TaskContext::new(32);
        context.memory.write_bytes(8, &[1]).unwrap();

        assert!(matches!(
            jump_if(&mut context, 8, 5),
            HandleResult::Jump(5)
        ));
        assert!(matches!(jump_if(&mut context, 9, 5), HandleResult::Move));

        assert!(matches!(
            jump_if_else(&mut context, 8, 3, 7),
            HandleResult::Jump(3)
        ));
        assert!(matches!(
            jump_if_else(&mut context, 9, 3, 7),
            HandleResult::Jump(7)
        ));
    }

    #[test]
    fn test_epilogue_restores_return_site() {
        let mut context = TaskContext::new(64);

        // a caller frame with one open scope, then a callee frame
        context.push_call_frame(ReturnAddress::Host(0), 0);
        context.push_scope_frame(0);
        context.scope_allocate(16, 0).unwrap();
        context.push_call_frame(ReturnAddress::Code(9), 0);
        context.push_scope_frame(0); // the callee body scope

        assert!(matches!(
            exit_function_at_end(&mut context),
            HandleResult::Jump(9)
        ));
        assert_eq!(context.frame_base(), 0);
        assert_eq!(context.frame_size(), 16);

        // popping the host-sentinel frame ends the loop and restores
        // the cursor
        context.pc = 99;
        assert!(matches!(
            exit_function_at_end(&mut context),
            HandleResult::End
        ));
        assert_eq!(context.pc, 0);
    }
}
