// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

// the scope pair and the constructor/destructor driver.
//
// the driver enforces:
// - construction order = declaration order (the entry list order),
// - destruction order = reverse declaration order (the compiler emits
//   the exit list pre-reversed),
// - partial failure: when constructor i aborts, only 0..i-1 are
//   destroyed,
// - elision: a cleared completion bit suppresses the destructor of the
//   storage handed off to the caller.

use ffscript_isa::instruction::{EnterScopeData, ExitScopeData};
use ffscript_program::program::Program;

use crate::context::TaskContext;
use crate::processor::{run_command_list, HandleResult};
use crate::TaskError;

pub fn enter_scope(
    context: &mut TaskContext,
    program: &Program,
    enter: &EnterScopeData,
) -> HandleResult {
    // the frame is pushed even on the error path so the matching exit
    // always finds it
    context.push_scope_frame(enter.constructor_count);
    if let Err(error) = context.scope_allocate(enter.data_size, enter.code_size) {
        context.set_error(error);
    }
    if context.is_error() {
        return HandleResult::Move;
    }

    for entry in &enter.constructors {
        if context.is_error() {
            break;
        }
        run_command_list(&entry.commands, context, program);
        if !context.is_error() {
            if let Some(frame) = context.current_scope_frame_mut() {
                frame.runtime_data.mark_executed(entry.slot);
            }
        }
    }
    HandleResult::Move
}

pub fn exit_scope(
    context: &mut TaskContext,
    program: &Program,
    exit: &ExitScopeData,
) -> HandleResult {
    if context.current_scope_frame().is_none() {
        context.set_error(TaskError::InvalidAddress);
        return HandleResult::Move;
    }

    // destructors run regardless of the error flag, but only for the
    // constructors whose completion bit is still set
    for entry in &exit.destructors {
        let completed = context
            .current_scope_frame()
            .map(|frame| frame.runtime_data.is_executed(entry.slot))
            .unwrap_or(false);
        if completed {
            run_command_list(&entry.commands, context, program);
        }
    }

    if let Err(error) = context.scope_unallocate() {
        context.set_error(error);
    }
    if exit.restore_call {
        if let Err(error) = context.pop_scope_frame() {
            context.set_error(error);
        }
    }
    HandleResult::Move
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use ffscript_isa::instruction::{EnterScopeData, ExitScopeData, Instruction};
    use ffscript_isa::native::HostError;
    use ffscript_program::adapters::native_fn;
    use ffscript_program::builder::ProgramBuilder;
    use ffscript_program::utils::auto_run_call;

    use crate::context::TaskContext;
    use crate::processor::{execute, HandleResult};
    use crate::TaskError;

    // builds a program whose only function enters one scope with two
    // counted constructors and exits it again. `fail_second` makes the
    // second constructor report a host error.
    fn build_scope_program(
        fail_second: bool,
    ) -> (
        ffscript_program::program::Program,
        Arc<AtomicI32>,
        Arc<AtomicI32>,
    ) {
        let ctor_count = Arc::new(AtomicI32::new(0));
        let dtor_count = Arc::new(AtomicI32::new(0));

        let mut builder = ProgramBuilder::new();
        let t_int = builder.register_type("int", 4, 4).unwrap();

        let ctor_calls = Arc::clone(&ctor_count);
        let ctor_id = builder
            .register_function(
                "CountingInitor",
                &[t_int],
                None,
                native_fn(move |_result, _params| {
                    ctor_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        let failing_id = builder
            .register_function(
                "FailingInitor",
                &[t_int],
                None,
                native_fn(|_result, _params| Err(HostError::new("constructor refused"))),
            )
            .unwrap();

        let dtor_calls = Arc::clone(&dtor_count);
        let dtor_id = builder
            .register_function(
                "CountingUninitor",
                &[t_int],
                None,
                native_fn(move |_result, _params| {
                    dtor_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        builder.register_constructor(t_int, ctor_id).unwrap();
        builder.register_destructor(t_int, dtor_id).unwrap();

        // frame layout: locals at 0 and 4, scratch result at 8,
        // parameter staging at 16
        let second_ctor = if fail_second { failing_id } else { ctor_id };
        let second_name = if fail_second {
            "FailingInitor"
        } else {
            "CountingInitor"
        };

        let mut writer = builder.begin_function("test", 0, 0);
        writer.emit(Instruction::EnterScope(Box::new(EnterScopeData {
            data_size: 24,
            code_size: 0,
            constructor_count: 2,
            constructors: vec![
                auto_run_call(0, ctor_id, "CountingInitor", 8, 16, 0),
                auto_run_call(1, second_ctor, second_name, 8, 16, 4),
            ],
        })));
        writer.emit(Instruction::ExitScope(Box::new(ExitScopeData {
            data_size: 24,
            code_size: 0,
            restore_call: true,
            destructors: vec![
                auto_run_call(1, dtor_id, "CountingUninitor", 8, 16, 4),
                auto_run_call(0, dtor_id, "CountingUninitor", 8, 16, 0),
            ],
        })));
        writer.emit(Instruction::ExitFunctionAtEnd);
        writer.finish();

        (builder.build().unwrap(), ctor_count, dtor_count)
    }

    fn run_scope_pair(program: &ffscript_program::program::Program, context: &mut TaskContext) {
        // execute the enter/exit pair directly
        for position in 0..2 {
            match program.instruction(position) {
                Some(instruction) => {
                    let result = execute(instruction, context, program);
                    assert!(matches!(result, HandleResult::Move));
                }
                None => panic!("missing instruction"),
            }
        }
    }

    #[test]
    fn test_constructors_and_destructors_pair_up() {
        let (program, ctor_count, dtor_count) = build_scope_program(false);
        let mut context = TaskContext::new(256);
        context.push_scope_frame(0); // the function body frame of the caller

        run_scope_pair(&program, &mut context);

        assert_eq!(ctor_count.load(Ordering::SeqCst), 2);
        assert_eq!(dtor_count.load(Ordering::SeqCst), 2);
        assert!(!context.is_error());
        // the scope stack is balanced again
        assert_eq!(context.scope_stack.len(), 1);
    }

    #[test]
    fn test_partial_construction_failure() {
        let (program, ctor_count, dtor_count) = build_scope_program(true);
        let mut context = TaskContext::new(256);
        context.push_scope_frame(0);

        run_scope_pair(&program, &mut context);

        // the first constructor completed, the second failed: exactly
        // one destructor runs
        assert_eq!(ctor_count.load(Ordering::SeqCst), 1);
        assert_eq!(dtor_count.load(Ordering::SeqCst), 1);
        assert_eq!(
            context.error(),
            Some(&TaskError::HostException(HostError::new(
                "constructor refused"
            )))
        );
    }

    #[test]
    fn test_elision_suppresses_destructor() {
        let (program, ctor_count, dtor_count) = build_scope_program(false);
        let mut context = TaskContext::new(256);
        context.push_scope_frame(0);

        // enter
        match program.instruction(0) {
            Some(instruction) => {
                execute(instruction, &mut context, &program);
            }
            None => panic!("missing instruction"),
        }
        // the value in slot 0 is about to be returned
        if let Some(frame) = context.current_scope_frame_mut() {
            frame.runtime_data.mark_constructor_not_executed(0);
        }
        // exit
        match program.instruction(1) {
            Some(instruction) => {
                execute(instruction, &mut context, &program);
            }
            None => panic!("missing instruction"),
        }

        assert_eq!(ctor_count.load(Ordering::SeqCst), 2);
        assert_eq!(dtor_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enter_scope_out_of_memory_still_balances() {
        let (program, ctor_count, dtor_count) = build_scope_program(false);
        // far too small for the 24-byte scope
        let mut context = TaskContext::new(8);
        context.push_scope_frame(0);

        run_scope_pair(&program, &mut context);

        assert_eq!(context.error(), Some(&TaskError::OutOfMemory));
        // no constructor ran, no destructor runs, the stacks balance
        assert_eq!(ctor_count.load(Ordering::SeqCst), 0);
        assert_eq!(dtor_count.load(Ordering::SeqCst), 0);
        assert_eq!(context.scope_stack.len(), 1);
        assert_eq!(context.frame_top(), 0);
    }
}
