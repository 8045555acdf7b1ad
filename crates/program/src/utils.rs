// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

// helpers that assemble the instruction shapes the compiler front end
// emits for common constructs. unit tests across the workspace build
// their programs with these.

use ffscript_isa::instruction::{AutoRunEntry, CallNativeData, Instruction};
use ffscript_isa::ADDRESS_SIZE_IN_BYTES;

use crate::builder::{CodeWriter, ProgramBuilder};
use crate::program::Program;
use crate::BuildError;

// the commands of one constructor/destructor invocation: stage the
// object address (and any extra argument addresses) into the pointer
// slots at `begin_param_offset`, then call.
pub fn native_call_commands(
    function_id: u32,
    function_name: &str,
    result_offset: i32,
    begin_param_offset: i32,
    argument_offsets: &[i32],
) -> Vec<Instruction> {
    let mut commands = Vec::with_capacity(argument_offsets.len() + 1);
    for (index, source_offset) in argument_offsets.iter().enumerate() {
        commands.push(Instruction::LeaOffsetToOffset {
            source_offset: *source_offset,
            target_offset: begin_param_offset + (index * ADDRESS_SIZE_IN_BYTES) as i32,
        });
    }
    commands.push(Instruction::CallNative(Box::new(CallNativeData {
        function_name: function_name.to_owned(),
        function_id,
        result_offset,
        begin_param_offset,
    })));
    commands
}

// one auto-run entry invoking a registered constructor or destructor on
// the object at `object_offset`.
pub fn auto_run_call(
    slot: u32,
    function_id: u32,
    function_name: &str,
    result_offset: i32,
    begin_param_offset: i32,
    object_offset: i32,
) -> AutoRunEntry {
    AutoRunEntry {
        slot,
        commands: native_call_commands(
            function_id,
            function_name,
            result_offset,
            begin_param_offset,
            &[object_offset],
        ),
    }
}

// builds a program holding exactly one script function.
pub fn build_single_function_program<F>(
    name: &str,
    param_size: u32,
    result_size: u32,
    emit: F,
) -> Result<(Program, u32), BuildError>
where
    F: FnOnce(&mut CodeWriter),
{
    let mut builder = ProgramBuilder::new();
    let mut writer = builder.begin_function(name, param_size, result_size);
    emit(&mut writer);
    let function_id = writer.finish();
    let program = builder.build()?;
    Ok((program, function_id))
}
