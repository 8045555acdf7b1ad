// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use std::sync::Arc;

use ffscript_isa::instruction::Instruction;
use ffscript_isa::native::NativeFunction;

use crate::static_context::StaticContext;

// where the code of a function lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    // entry position inside the program's instruction list.
    Script { entry: usize },
    // index into the program's native callable table.
    Native { native_index: usize },
}

// one row of the function table.
//
// `param_size` and `result_size` are byte sizes; for a native function
// the parameter region is one pointer slot per declared parameter.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub code: FunctionCode,
    pub param_size: u32,
    pub result_size: u32,
}

impl FunctionEntry {
    pub fn is_native(&self) -> bool {
        matches!(self.code, FunctionCode::Native { .. })
    }
}

// one row of the type table.
//
// the constructor/destructor lists are consumed by the compiler when it
// emits the scope auto-run lists; the engine itself only ever executes
// what was emitted.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub name: String,
    pub size: u32,
    pub alignment: u32,
    pub constructors: Vec<u32>,
    pub destructors: Vec<u32>,
}

// the immutable image of a compiled program.
//
// a program is built once (see `ProgramBuilder`) and then shared
// read-only between tasks; host threads may each drive their own task
// over the same image concurrently.
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) functions: Vec<FunctionEntry>,
    pub(crate) natives: Vec<Arc<dyn NativeFunction>>,
    pub(crate) types: Vec<TypeEntry>,
    pub(crate) static_context: Arc<StaticContext>,
}

impl Program {
    pub fn instruction(&self, position: usize) -> Option<&Instruction> {
        self.instructions.get(position)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn function(&self, function_id: u32) -> Option<&FunctionEntry> {
        self.functions.get(function_id as usize)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    // the id of the first function with the given name, the counterpart
    // of the compiler's find-function lookup.
    pub fn function_by_name(&self, name: &str) -> Option<(u32, &FunctionEntry)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, entry)| (id as u32, entry))
    }

    pub fn native(&self, native_index: usize) -> Option<&Arc<dyn NativeFunction>> {
        self.natives.get(native_index)
    }

    pub fn type_entry(&self, type_id: u32) -> Option<&TypeEntry> {
        self.types.get(type_id as usize)
    }

    pub fn static_context(&self) -> &Arc<StaticContext> {
        &self.static_context
    }

    // the full disassembly of the code image, one or more lines per
    // instruction, prefixed with the instruction position.
    pub fn disassemble(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (position, instruction) in self.instructions.iter().enumerate() {
            let mut commands = Vec::new();
            instruction.describe(&mut commands);
            let mut commands_iter = commands.into_iter();
            if let Some(first) = commands_iter.next() {
                lines.push(format!("{:#06x} {}", position, first));
            }
            for rest in commands_iter {
                lines.push(format!("       {}", rest));
            }
        }
        lines
    }
}
