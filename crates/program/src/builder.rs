// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use std::sync::Arc;

use ffscript_isa::instruction::Instruction;
use ffscript_isa::native::NativeFunction;
use ffscript_isa::ADDRESS_SIZE_IN_BYTES;

use crate::program::{FunctionCode, FunctionEntry, Program, TypeEntry};
use crate::static_context::StaticContext;
use crate::BuildError;

// assembles a program image.
//
// the text front end drives this builder when it lowers a parsed
// program; tests and embedders drive it directly. registration mistakes
// (unknown ids, duplicated names) surface here or in `build()`, the
// execution engine trusts the image it receives.
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    functions: Vec<FunctionEntry>,
    natives: Vec<Arc<dyn NativeFunction>>,
    types: Vec<TypeEntry>,
    static_context: Arc<StaticContext>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::with_static_data_size(0)
    }

    // the global (static) data region is allocated before any code is
    // assembled: the compiler bakes the absolute addresses of globals
    // into instructions and accessor chains.
    pub fn with_static_data_size(size_in_bytes: usize) -> Self {
        Self {
            instructions: Vec::new(),
            functions: Vec::new(),
            natives: Vec::new(),
            types: Vec::new(),
            static_context: Arc::new(StaticContext::new(size_in_bytes)),
        }
    }

    pub fn static_context(&self) -> &Arc<StaticContext> {
        &self.static_context
    }

    pub fn register_type(
        &mut self,
        name: &str,
        size: u32,
        alignment: u32,
    ) -> Result<u32, BuildError> {
        if self.types.iter().any(|entry| entry.name == name) {
            return Err(BuildError::DuplicateTypeName(name.to_owned()));
        }
        let type_id = self.types.len() as u32;
        self.types.push(TypeEntry {
            name: name.to_owned(),
            size,
            alignment,
            constructors: Vec::new(),
            destructors: Vec::new(),
        });
        Ok(type_id)
    }

    // registers a native function.
    //
    // `param_types` entries are type ids; the parameter region of the
    // call is one pointer slot per declared parameter (the compiler
    // stages the argument addresses), so only the count matters for the
    // signature's parameter byte size. the result size is taken from the
    // result type, `None` means void.
    pub fn register_function(
        &mut self,
        name: &str,
        param_types: &[u32],
        result_type: Option<u32>,
        callable: Arc<dyn NativeFunction>,
    ) -> Result<u32, BuildError> {
        for type_id in param_types {
            if *type_id as usize >= self.types.len() {
                return Err(BuildError::UnknownType(*type_id));
            }
        }
        let result_size = match result_type {
            Some(type_id) => {
                self.types
                    .get(type_id as usize)
                    .ok_or(BuildError::UnknownType(type_id))?
                    .size
            }
            None => 0,
        };

        let native_index = self.natives.len();
        self.natives.push(callable);

        let function_id = self.functions.len() as u32;
        self.functions.push(FunctionEntry {
            name: name.to_owned(),
            code: FunctionCode::Native { native_index },
            param_size: (param_types.len() * ADDRESS_SIZE_IN_BYTES) as u32,
            result_size,
        });
        Ok(function_id)
    }

    pub fn register_constructor(
        &mut self,
        type_id: u32,
        function_id: u32,
    ) -> Result<(), BuildError> {
        if function_id as usize >= self.functions.len() {
            return Err(BuildError::UnknownFunction(function_id));
        }
        let entry = self
            .types
            .get_mut(type_id as usize)
            .ok_or(BuildError::UnknownType(type_id))?;
        entry.constructors.push(function_id);
        Ok(())
    }

    pub fn register_destructor(
        &mut self,
        type_id: u32,
        function_id: u32,
    ) -> Result<(), BuildError> {
        if function_id as usize >= self.functions.len() {
            return Err(BuildError::UnknownFunction(function_id));
        }
        let entry = self
            .types
            .get_mut(type_id as usize)
            .ok_or(BuildError::UnknownType(type_id))?;
        entry.destructors.push(function_id);
        Ok(())
    }

    // opens a script function whose entry is the next instruction
    // position. the returned writer borrows the builder, so the function
    // is necessarily assembled contiguously.
    //
    // `param_size` counts the parameter bytes only; the reserved
    // return-address slot of the linked calling convention is not part
    // of it.
    pub fn begin_function(
        &mut self,
        name: &str,
        param_size: u32,
        result_size: u32,
    ) -> CodeWriter<'_> {
        let function_id = self.functions.len() as u32;
        let entry = self.instructions.len();
        self.functions.push(FunctionEntry {
            name: name.to_owned(),
            code: FunctionCode::Script { entry },
            param_size,
            result_size,
        });
        CodeWriter {
            builder: self,
            function_id,
        }
    }

    pub fn next_position(&self) -> usize {
        self.instructions.len()
    }

    // rewrites the target of a jump-class instruction, used to resolve
    // forward references.
    pub fn patch_jump(&mut self, position: usize, new_target: usize) -> Result<(), BuildError> {
        let instruction = self
            .instructions
            .get_mut(position)
            .ok_or(BuildError::InvalidCodePosition(position))?;
        match instruction {
            Instruction::Jump { target }
            | Instruction::JumpIf { target, .. }
            | Instruction::Break { target, .. }
            | Instruction::Continue { target, .. } => {
                *target = new_target;
                Ok(())
            }
            _ => Err(BuildError::NotAJump(position)),
        }
    }

    pub fn patch_jump_if_else(
        &mut self,
        position: usize,
        new_target_true: usize,
        new_target_false: usize,
    ) -> Result<(), BuildError> {
        let instruction = self
            .instructions
            .get_mut(position)
            .ok_or(BuildError::InvalidCodePosition(position))?;
        match instruction {
            Instruction::JumpIfElse {
                target_true,
                target_false,
                ..
            } => {
                *target_true = new_target_true;
                *target_false = new_target_false;
                Ok(())
            }
            _ => Err(BuildError::NotAJump(position)),
        }
    }

    // rewrites the entry of a script-call instruction, used for calls to
    // functions that are assembled later (e.g. mutual recursion).
    pub fn patch_call_entry(&mut self, position: usize, new_entry: usize) -> Result<(), BuildError> {
        let instruction = self
            .instructions
            .get_mut(position)
            .ok_or(BuildError::InvalidCodePosition(position))?;
        match instruction {
            Instruction::CallScript(data) => {
                data.entry = new_entry;
                Ok(())
            }
            Instruction::CallScriptLinked(data) | Instruction::CallScriptNested(data) => {
                data.entry = new_entry;
                Ok(())
            }
            Instruction::CreateLambda(data) => {
                data.entry = new_entry;
                Ok(())
            }
            _ => Err(BuildError::NotAJump(position)),
        }
    }

    pub fn build(self) -> Result<Program, BuildError> {
        let code_length = self.instructions.len();
        validate_commands(
            &self.instructions,
            &self.functions,
            self.natives.len(),
            code_length,
        )?;

        log::debug!(
            "program built: {} instructions, {} functions, {} types, {} static bytes",
            code_length,
            self.functions.len(),
            self.types.len(),
            self.static_context.size_in_bytes()
        );

        Ok(Program {
            instructions: self.instructions,
            functions: self.functions,
            natives: self.natives,
            types: self.types,
            static_context: self.static_context,
        })
    }
}

// checks every id and code position an instruction carries, including
// the embedded sub-lists of the scope pair and the multi-command
// unwinds.
fn validate_commands(
    commands: &[Instruction],
    functions: &[FunctionEntry],
    native_count: usize,
    code_length: usize,
) -> Result<(), BuildError> {
    for command in commands {
        validate_command(command, functions, native_count, code_length)?;
    }
    Ok(())
}

fn validate_command(
    command: &Instruction,
    functions: &[FunctionEntry],
    native_count: usize,
    code_length: usize,
) -> Result<(), BuildError> {
    let check_native_call = |function_id: u32| -> Result<(), BuildError> {
        let entry = functions
            .get(function_id as usize)
            .ok_or(BuildError::UnknownFunction(function_id))?;
        match entry.code {
            FunctionCode::Native { native_index } if native_index < native_count => Ok(()),
            FunctionCode::Native { .. } | FunctionCode::Script { .. } => {
                Err(BuildError::NotNative(function_id))
            }
        }
    };
    let check_position = |position: usize| -> Result<(), BuildError> {
        if position < code_length {
            Ok(())
        } else {
            Err(BuildError::InvalidCodePosition(position))
        }
    };

    match command {
        Instruction::EnterScope(data) => {
            for entry in &data.constructors {
                validate_commands(&entry.commands, functions, native_count, code_length)?;
            }
        }
        Instruction::ExitScope(data) => {
            for entry in &data.destructors {
                validate_commands(&entry.commands, functions, native_count, code_length)?;
            }
        }
        Instruction::Break { unwind, target } | Instruction::Continue { unwind, target } => {
            check_position(*target)?;
            validate_commands(unwind, functions, native_count, code_length)?;
        }
        Instruction::ExitFunctionAtReturn(data) => {
            validate_commands(&data.unwind, functions, native_count, code_length)?;
        }
        Instruction::Jump { target } => check_position(*target)?,
        Instruction::JumpIf { target, .. } => check_position(*target)?,
        Instruction::JumpIfElse {
            target_true,
            target_false,
            ..
        } => {
            check_position(*target_true)?;
            check_position(*target_false)?;
        }
        Instruction::CallNative(data) => check_native_call(data.function_id)?,
        Instruction::CallNativeWithAssist(data) => check_native_call(data.call.function_id)?,
        Instruction::CallDynamic(data) => check_native_call(data.call.function_id)?,
        Instruction::CallScript(data) => check_position(data.entry)?,
        Instruction::CallScriptLinked(data) | Instruction::CallScriptNested(data) => {
            check_position(data.entry)?
        }
        Instruction::CreateLambda(data) => check_position(data.entry)?,
        _ => {}
    }
    Ok(())
}

// appends the instructions of one script function to the image.
pub struct CodeWriter<'a> {
    builder: &'a mut ProgramBuilder,
    function_id: u32,
}

impl CodeWriter<'_> {
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let position = self.builder.instructions.len();
        self.builder.instructions.push(instruction);
        position
    }

    pub fn next_position(&self) -> usize {
        self.builder.instructions.len()
    }

    // forward-reference patching, reachable while the writer borrows
    // the builder.
    pub fn patch_jump(&mut self, position: usize, new_target: usize) -> Result<(), BuildError> {
        self.builder.patch_jump(position, new_target)
    }

    pub fn patch_jump_if_else(
        &mut self,
        position: usize,
        new_target_true: usize,
        new_target_false: usize,
    ) -> Result<(), BuildError> {
        self.builder
            .patch_jump_if_else(position, new_target_true, new_target_false)
    }

    pub fn patch_call_entry(&mut self, position: usize, new_entry: usize) -> Result<(), BuildError> {
        self.builder.patch_call_entry(position, new_entry)
    }

    pub fn function_id(&self) -> u32 {
        self.function_id
    }

    pub fn finish(self) -> u32 {
        self.function_id
    }
}
