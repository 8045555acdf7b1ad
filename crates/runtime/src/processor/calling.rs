// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

// the call instructions. all flavours share the protocol "result first,
// then params":
//
// - native calls resolve the absolute addresses of the result slot and
//   the parameter pointer array, then invoke the callable on the
//   caller's thread.
// - script calls push a call frame and move the frame base to the
//   current frame top; the callee finds its reserved return-address
//   slot at offset 0 and its parameters after it.
// - the nested flavour drives the sub-interpretation to completion
//   before the instruction finishes, bounded by the host-sentinel
//   return address of the frame it pushed.

use ffscript_isa::function_info::{CaptureInfo, RuntimeFunctionInfo, RuntimeFunctionKind};
use ffscript_isa::instruction::{
    CallDynamicData, CallNativeAssistData, CallNativeData, CallScriptData, CallScriptLinkedData,
    CreateLambdaData, ForwarderData,
};
use ffscript_isa::variant::{SimpleVariant, SimpleVariantArray};
use ffscript_isa::ADDRESS_SIZE_IN_BYTES;
use ffscript_program::program::{FunctionCode, Program};

use crate::context::{ReturnAddress, TaskContext};
use crate::processor::{fail, interpret, HandleResult};
use crate::TaskError;

fn invoke_native(
    context: &mut TaskContext,
    program: &Program,
    function_id: u32,
    result_offset: i32,
    begin_param_offset: i32,
) -> HandleResult {
    let result_address = match context.absolute_address_mut(result_offset) {
        Ok(pointer) => pointer,
        Err(error) => return fail(context, error),
    };
    let param_array = match context.absolute_address_mut(begin_param_offset) {
        Ok(pointer) => pointer as *const *mut u8,
        Err(error) => return fail(context, error),
    };

    // ids are validated when the program is built; a mismatch here means
    // the slot bytes of a forwarded call were corrupted
    let callable = match program.function(function_id).map(|entry| &entry.code) {
        Some(FunctionCode::Native { native_index }) => match program.native(*native_index) {
            Some(callable) => callable,
            None => return fail(context, TaskError::InvalidAddress),
        },
        _ => return fail(context, TaskError::InvalidAddress),
    };

    match callable.call(result_address, param_array) {
        Ok(()) => HandleResult::Move,
        Err(error) => {
            log::debug!("native function {} reported: {}", function_id, error);
            fail(context, TaskError::HostException(error))
        }
    }
}

pub fn call_native(
    context: &mut TaskContext,
    program: &Program,
    call: &CallNativeData,
) -> HandleResult {
    invoke_native(
        context,
        program,
        call.function_id,
        call.result_offset,
        call.begin_param_offset,
    )
}

pub fn call_native_with_assist(
    context: &mut TaskContext,
    program: &Program,
    call: &CallNativeAssistData,
) -> HandleResult {
    // materialize the argument addresses into the pointer slots
    for pair in &call.assist_pairs {
        let address = match context.absolute_address(pair.source_offset) {
            Ok(pointer) => pointer as usize,
            Err(error) => return fail(context, error),
        };
        if let Err(error) = context.lea(pair.pointer_slot_offset, address) {
            return fail(context, error);
        }
    }
    call_native(context, program, &call.call)
}

pub fn call_dynamic(
    context: &mut TaskContext,
    program: &Program,
    call: &CallDynamicData,
) -> HandleResult {
    let count = call.params.len();
    let begin_position = match context.frame_position(call.call.begin_param_offset) {
        Ok(position) => position,
        Err(error) => return fail(context, error),
    };
    if !context
        .memory
        .prepare_write(begin_position, SimpleVariantArray::packed_size_in_bytes(count))
    {
        return fail(context, TaskError::OutOfMemory);
    }

    // | array address | count, padding | variant 0 | variant 1 | ...
    let header_position = begin_position + ADDRESS_SIZE_IN_BYTES;
    let header_address = context.memory.get_mut_ptr(header_position);
    unsafe {
        std::ptr::write_unaligned(
            header_address as *mut SimpleVariantArray,
            SimpleVariantArray::new(count as i32),
        );
    }

    for (index, param) in call.params.iter().enumerate() {
        let argument_address = match context.absolute_address_mut(param.source_offset) {
            Ok(pointer) => pointer,
            Err(error) => return fail(context, error),
        };
        let variant = SimpleVariant {
            script_type: param.script_type,
            type_name: param.type_name.as_ptr() as *const u8,
            size: param.size,
            data: argument_address,
        };
        let element_position = header_position
            + SimpleVariantArray::HEADER_SIZE_IN_BYTES
            + index * std::mem::size_of::<SimpleVariant>();
        unsafe {
            std::ptr::write_unaligned(
                context.memory.get_mut_ptr(element_position) as *mut SimpleVariant,
                variant,
            );
        }
    }

    let header_value = context.memory.get_ptr(header_position) as usize;
    if let Err(error) = context.lea(call.call.begin_param_offset, header_value) {
        return fail(context, error);
    }
    call_native(context, program, &call.call)
}

// the plain script call: the callee frame starts with the result region
// itself, no return-address slot is reserved. the caller consumes the
// result afterwards with `RetrieveFunctionResult`.
pub fn call_script(context: &mut TaskContext, call: &CallScriptData) -> HandleResult {
    let param_source = if call.param_size > 0 {
        match context.absolute_address(call.begin_param_offset) {
            Ok(pointer) => pointer,
            Err(error) => return fail(context, error),
        }
    } else {
        std::ptr::null()
    };

    let result_address = context.memory.get_ptr(context.frame_top()) as usize;
    context.push_call_frame(ReturnAddress::Code(context.pc), result_address);

    if call.param_size > 0 {
        if let Err(error) = context.write_from_ptr(
            call.result_size as i32,
            param_source,
            call.param_size as usize,
        ) {
            context.pop_call_frame();
            return fail(context, error);
        }
    }
    HandleResult::Jump(call.entry)
}

// pushes the frame of a linked call and stages the return-address slot,
// the parameters and (for a lambda) the captured environment. on a
// staging failure the half-built frame is popped again so the stacks
// stay balanced.
pub(crate) fn stage_linked_frame(
    context: &mut TaskContext,
    return_address: ReturnAddress,
    result_address: usize,
    param_source: *const u8,
    param_size: usize,
    capture: Option<&CaptureInfo>,
) -> Result<(), TaskError> {
    context.push_call_frame(return_address, result_address);

    let staged = stage_frame_content(context, result_address, param_source, param_size, capture);
    if let Err(error) = staged {
        context.pop_call_frame();
        return Err(error);
    }
    Ok(())
}

fn stage_frame_content(
    context: &mut TaskContext,
    result_address: usize,
    param_source: *const u8,
    param_size: usize,
    capture: Option<&CaptureInfo>,
) -> Result<(), TaskError> {
    context.lea(0, result_address)?;
    if param_size > 0 {
        context.write_from_ptr(ADDRESS_SIZE_IN_BYTES as i32, param_source, param_size)?;
    }
    if let Some(capture_info) = capture {
        if capture_info.size > 0 {
            context.write_from_ptr(
                capture_info.target_offset as i32,
                capture_info.data,
                capture_info.size as usize,
            )?;
        }
    }
    Ok(())
}

fn resolve_linked_operands(
    context: &mut TaskContext,
    result_offset: i32,
    begin_param_offset: i32,
    param_size: u32,
) -> Result<(usize, *const u8), TaskError> {
    let result_address = context.absolute_address_mut(result_offset)? as usize;
    let param_source = if param_size > 0 {
        context.absolute_address(begin_param_offset)?
    } else {
        std::ptr::null()
    };
    Ok((result_address, param_source))
}

pub fn call_script_linked(context: &mut TaskContext, call: &CallScriptLinkedData) -> HandleResult {
    let (result_address, param_source) = match resolve_linked_operands(
        context,
        call.result_offset,
        call.begin_param_offset,
        call.param_size,
    ) {
        Ok(operands) => operands,
        Err(error) => return fail(context, error),
    };

    let return_address = ReturnAddress::Code(context.pc);
    match stage_linked_frame(
        context,
        return_address,
        result_address,
        param_source,
        call.param_size as usize,
        None,
    ) {
        Ok(()) => HandleResult::Jump(call.entry),
        Err(error) => fail(context, error),
    }
}

// drives the callee to completion inside this instruction; used when
// script code must produce its result before the current (possibly
// native) frame can continue.
fn run_nested_call(
    context: &mut TaskContext,
    program: &Program,
    entry: usize,
    result_offset: i32,
    begin_param_offset: i32,
    param_size: u32,
    capture: Option<&CaptureInfo>,
) -> HandleResult {
    let (result_address, param_source) =
        match resolve_linked_operands(context, result_offset, begin_param_offset, param_size) {
            Ok(operands) => operands,
            Err(error) => return fail(context, error),
        };

    let return_address = ReturnAddress::Host(context.pc);
    if let Err(error) = stage_linked_frame(
        context,
        return_address,
        result_address,
        param_source,
        param_size as usize,
        capture,
    ) {
        return fail(context, error);
    }

    context.pc = entry;
    interpret(context, program);
    // the epilogue of the callee restored the cursor to this
    // instruction's successor
    HandleResult::Move
}

pub fn call_script_nested(
    context: &mut TaskContext,
    program: &Program,
    call: &CallScriptLinkedData,
) -> HandleResult {
    run_nested_call(
        context,
        program,
        call.entry,
        call.result_offset,
        call.begin_param_offset,
        call.param_size,
        None,
    )
}

// dispatches a first-class function value: reads the
// `RuntimeFunctionInfo` out of its slot and routes by the kind tag.
pub fn forward_call(
    context: &mut TaskContext,
    program: &Program,
    forward: &ForwarderData,
) -> HandleResult {
    let info_address = match context.absolute_address(forward.info_offset) {
        Ok(pointer) => pointer,
        Err(error) => return fail(context, error),
    };
    let info = unsafe { RuntimeFunctionInfo::read_from(info_address) };

    match info.kind() {
        None => fail(context, TaskError::InvalidAddress),
        Some(RuntimeFunctionKind::Native) => invoke_native(
            context,
            program,
            info.entry as u32,
            forward.result_offset,
            forward.begin_param_offset,
        ),
        Some(RuntimeFunctionKind::Script) => run_nested_call(
            context,
            program,
            info.entry,
            forward.result_offset,
            forward.begin_param_offset,
            forward.param_size,
            None,
        ),
        Some(RuntimeFunctionKind::Lambda) => run_nested_call(
            context,
            program,
            info.entry,
            forward.result_offset,
            forward.begin_param_offset,
            forward.param_size,
            Some(&info.capture),
        ),
    }
}

// captures a byte range of the current frame into a heap buffer and
// writes a `RuntimeFunctionInfo` into the result slot. the buffer is
// released by the destructor registered against the function-info type
// (or by the host, for a value returned out of the task).
pub fn create_lambda(context: &mut TaskContext, create: &CreateLambdaData) -> HandleResult {
    let info = if create.capture_size == 0 {
        // nothing captured, the value degenerates to a plain script
        // function
        RuntimeFunctionInfo::script(create.entry)
    } else {
        let source = match context.absolute_address(create.source_offset) {
            Ok(pointer) => pointer,
            Err(error) => return fail(context, error),
        };
        let bytes =
            unsafe { std::slice::from_raw_parts(source, create.capture_size as usize) };
        let capture_data = RuntimeFunctionInfo::allocate_capture(bytes);
        RuntimeFunctionInfo::lambda(
            create.entry,
            capture_data,
            create.capture_size,
            create.capture_target_offset,
        )
    };

    let info_bytes = &info as *const RuntimeFunctionInfo as *const u8;
    match context.write_from_ptr(
        create.result_offset,
        info_bytes,
        RuntimeFunctionInfo::SIZE_IN_BYTES,
    ) {
        Ok(()) => HandleResult::Move,
        Err(error) => {
            let mut orphan = info;
            orphan.release_capture();
            fail(context, error)
        }
    }
}

// copies from the implicit result position, the top of the current
// frame, where the frame of the just-returned plain call began.
pub fn retrieve_function_result(
    context: &mut TaskContext,
    result_size: u32,
    target_offset: i32,
) -> HandleResult {
    let source_position = context.frame_top();
    if !context
        .memory
        .check_range(source_position, result_size as usize)
    {
        return fail(context, TaskError::InvalidAddress);
    }
    let source = context.memory.get_ptr(source_position);
    match context.write_from_ptr(target_offset, source, result_size as usize) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}
