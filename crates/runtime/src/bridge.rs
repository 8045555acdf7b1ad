// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

// the host side of the script<->host boundary.
//
// host code calls into script code the same way the forwarder does: a
// call frame carrying a host-sentinel return address is pushed, the
// interpretation loop runs until that frame pops, then control returns
// to the host. this also covers invoking a `RuntimeFunctionInfo` the
// host received as a task result, e.g. a lambda that outlived its
// defining scope.

use ffscript_isa::function_info::{CaptureInfo, RuntimeFunctionInfo, RuntimeFunctionKind};
use ffscript_program::program::{FunctionCode, Program};

use crate::context::{ReturnAddress, TaskContext};
use crate::processor::calling::stage_linked_frame;
use crate::processor::interpret;
use crate::task::ScriptParamBuffer;
use crate::TaskError;

// runs a script function entry to completion on this context.
//
// the parameter bytes are copied into the callee's parameter region,
// the result is written through the reserved return-address slot into
// `result_address` (a host buffer).
pub fn run_script_entry(
    context: &mut TaskContext,
    program: &Program,
    entry: usize,
    capture: Option<&CaptureInfo>,
    result_address: *mut u8,
    params: &ScriptParamBuffer,
) -> Result<(), TaskError> {
    let staged = stage_linked_frame(
        context,
        ReturnAddress::Host(context.pc),
        result_address as usize,
        params.data_ptr(),
        params.total_size_in_bytes(),
        capture,
    );
    if let Err(error) = staged {
        context.set_error(error.clone());
        return Err(error);
    }

    context.pc = entry;
    interpret(context, program);

    match context.error() {
        Some(error) => Err(error.clone()),
        None => Ok(()),
    }
}

// runs a registered native function with the host parameter buffer: the
// parameter bytes are copied to the frame top and one pointer per
// parameter is handed to the callable.
pub fn run_native_function(
    context: &mut TaskContext,
    program: &Program,
    function_id: u32,
    result_address: *mut u8,
    params: &ScriptParamBuffer,
) -> Result<(), TaskError> {
    let callable = match program.function(function_id).map(|entry| &entry.code) {
        Some(FunctionCode::Native { native_index }) => program
            .native(*native_index)
            .ok_or(TaskError::UnknownFunction(function_id))?,
        _ => return Err(TaskError::UnknownFunction(function_id)),
    };

    let base = context.frame_top();
    let total = params.total_size_in_bytes();
    if total > 0 {
        if let Err(error) = context.memory.write(base, params.data_ptr(), total) {
            context.set_error(error.clone());
            return Err(error);
        }
    }
    let pointers: Vec<*mut u8> = params
        .param_layout()
        .iter()
        .map(|(offset, _)| context.memory.get_mut_ptr(base + offset))
        .collect();

    match callable.call(result_address, pointers.as_ptr()) {
        Ok(()) => Ok(()),
        Err(error) => {
            let task_error = TaskError::HostException(error);
            context.set_error(task_error.clone());
            Err(task_error)
        }
    }
}

// the host-facing forwarder: dispatches a first-class function value by
// its kind tag.
pub fn call_function_info(
    context: &mut TaskContext,
    program: &Program,
    info: &RuntimeFunctionInfo,
    result_address: *mut u8,
    params: &ScriptParamBuffer,
) -> Result<(), TaskError> {
    match info.kind() {
        None => {
            context.set_error(TaskError::InvalidAddress);
            Err(TaskError::InvalidAddress)
        }
        Some(RuntimeFunctionKind::Native) => {
            run_native_function(context, program, info.entry as u32, result_address, params)
        }
        Some(RuntimeFunctionKind::Script) => {
            run_script_entry(context, program, info.entry, None, result_address, params)
        }
        Some(RuntimeFunctionKind::Lambda) => run_script_entry(
            context,
            program,
            info.entry,
            Some(&info.capture),
            result_address,
            params,
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use ffscript_isa::function_info::{RuntimeFunctionInfo, RuntimeFunctionKind};
    use ffscript_isa::instruction::{
        CreateLambdaData, EnterScopeData, ExitFunctionData, ExitScopeData, Instruction,
    };
    use ffscript_isa::{HostPtr, ADDRESS_SIZE_IN_BYTES};
    use ffscript_program::adapters::{function_info_destructor, native_fn, param_as, write_result};
    use ffscript_program::builder::ProgramBuilder;
    use ffscript_program::program::Program;
    use ffscript_program::utils::native_call_commands;

    use crate::task::{ScriptParamBuffer, ScriptTask};

    static FIVE: i32 = 5;

    // a program with
    // - an anonymous function adding its parameter to a captured i32,
    // - `make()` creating a lambda capturing a local `x = 5` and
    //   returning it; the function-info destructor is registered and
    //   elided on return.
    fn build_lambda_program() -> (Arc<Program>, u32) {
        let mut builder = ProgramBuilder::new();
        let t_int = builder.register_type("int", 4, 4).unwrap();
        let t_function = builder
            .register_type(
                "function",
                RuntimeFunctionInfo::SIZE_IN_BYTES as u32,
                ADDRESS_SIZE_IN_BYTES as u32,
            )
            .unwrap();

        let add_id = builder
            .register_function(
                "AddInteger",
                &[t_int, t_int],
                Some(t_int),
                native_fn(|result, params| {
                    unsafe {
                        let a = *param_as::<i32>(params, 0);
                        let b = *param_as::<i32>(params, 1);
                        write_result(result, a + b);
                    }
                    Ok(())
                }),
            )
            .unwrap();

        let release_id = builder
            .register_function(
                "ReleaseFunction",
                &[t_function],
                None,
                function_info_destructor(),
            )
            .unwrap();
        builder.register_destructor(t_function, release_id).unwrap();

        // the anonymous function: linked frame, one i32 parameter at 8,
        // the capture lands at 12, temporaries above
        let mut anonymous = builder.begin_function("test.anonymous.0", 4, 4);
        let anonymous_entry = anonymous.next_position();
        anonymous.emit(Instruction::EnterScope(Box::new(EnterScopeData {
            data_size: 40,
            code_size: 0,
            constructor_count: 0,
            constructors: vec![],
        })));
        anonymous.emit(Instruction::LeaOffsetToOffset {
            source_offset: 8,
            target_offset: 24,
        });
        anonymous.emit(Instruction::LeaOffsetToOffset {
            source_offset: 12,
            target_offset: 24 + ADDRESS_SIZE_IN_BYTES as i32,
        });
        anonymous.emit(ffscript_isa::instruction::Instruction::CallNative(Box::new(
            ffscript_isa::instruction::CallNativeData {
                function_name: "AddInteger".to_owned(),
                function_id: add_id,
                result_offset: 16,
                begin_param_offset: 24,
            },
        )));
        anonymous.emit(Instruction::WriteValueToRef {
            source_offset: 16,
            value_size: 4,
            target_ref_offset: 0,
        });
        anonymous.emit(Instruction::ExitScope(Box::new(ExitScopeData {
            data_size: 40,
            code_size: 0,
            restore_call: false,
            destructors: vec![],
        })));
        anonymous.emit(Instruction::ExitFunctionAtEnd);
        anonymous.finish();

        // make(): x at 8, the function value at 16, call staging at 48
        let info_size = RuntimeFunctionInfo::SIZE_IN_BYTES as u32;
        let mut make = builder.begin_function("make", 0, info_size);
        make.emit(Instruction::EnterScope(Box::new(EnterScopeData {
            data_size: 64,
            code_size: 0,
            constructor_count: 1,
            constructors: vec![ffscript_isa::instruction::AutoRunEntry {
                slot: 0,
                commands: vec![
                    Instruction::WriteValue {
                        source: HostPtr(&FIVE as *const i32 as *const u8),
                        value_size: 4,
                        target_offset: 8,
                    },
                    Instruction::CreateLambda(Box::new(CreateLambdaData {
                        result_offset: 16,
                        source_offset: 8,
                        capture_size: 4,
                        entry: anonymous_entry,
                        capture_target_offset: 12,
                    })),
                ],
            }],
        })));
        make.emit(Instruction::WriteValueToRef {
            source_offset: 16,
            value_size: info_size,
            target_ref_offset: 0,
        });
        make.emit(Instruction::ExitFunctionAtReturn(Box::new(
            ExitFunctionData {
                elide_slot: Some(0),
                unwind: vec![Instruction::ExitScope(Box::new(ExitScopeData {
                    data_size: 64,
                    code_size: 0,
                    restore_call: false,
                    destructors: vec![ffscript_isa::instruction::AutoRunEntry {
                        slot: 0,
                        commands: native_call_commands(
                            release_id,
                            "ReleaseFunction",
                            56,
                            48,
                            &[16],
                        ),
                    }],
                }))],
            },
        )));
        make.emit(Instruction::ExitScope(Box::new(ExitScopeData {
            data_size: 64,
            code_size: 0,
            restore_call: false,
            destructors: vec![ffscript_isa::instruction::AutoRunEntry {
                slot: 0,
                commands: native_call_commands(release_id, "ReleaseFunction", 56, 48, &[16]),
            }],
        })));
        make.emit(Instruction::ExitFunctionAtEnd);
        let make_id = make.finish();

        (Arc::new(builder.build().unwrap()), make_id)
    }

    // a lambda returned out of its defining scope stays callable: the
    // capture buffer was handed off (destructor elided), not destroyed.
    #[test]
    fn test_returned_lambda_outlives_its_scope() {
        let (program, make_id) = build_lambda_program();
        let mut task = ScriptTask::new(Arc::clone(&program));

        task.run_function(make_id, &ScriptParamBuffer::new()).unwrap();
        let info = unsafe { RuntimeFunctionInfo::read_from(task.result_ptr()) };
        assert_eq!(info.kind(), Some(RuntimeFunctionKind::Lambda));
        assert!(info.has_capture());

        // the defining scope is gone, invoke the captured function
        let mut arguments = ScriptParamBuffer::new();
        arguments.add_param(7i32);
        task.run_function_info(&info, 4, &arguments).unwrap();
        assert_eq!(task.result_as::<i32>(), Some(12));

        // run it again, the capture is still alive
        let mut arguments = ScriptParamBuffer::new();
        arguments.add_param(100i32);
        task.run_function_info(&info, 4, &arguments).unwrap();
        assert_eq!(task.result_as::<i32>(), Some(105));

        // the host owns the returned value and releases it
        let mut owned = info;
        owned.release_capture();
        assert!(!owned.has_capture());
    }
}
