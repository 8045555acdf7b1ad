// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use std::sync::Arc;

use ffscript_isa::function_info::RuntimeFunctionInfo;
use ffscript_program::program::{FunctionCode, Program};

use crate::bridge;
use crate::context::TaskContext;
use crate::{TaskError, DEFAULT_STACK_SIZE_IN_BYTES};

// the host -> task parameter handoff: an ordered sequence of values,
// stored contiguously, with the position and size of each recorded.
// script calls copy the whole blob into the callee's parameter region,
// native calls receive one pointer per value.
#[derive(Debug, Clone, Default)]
pub struct ScriptParamBuffer {
    bytes: Vec<u8>,
    params: Vec<(usize, usize)>,
}

impl ScriptParamBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn add_param<T: Copy>(&mut self, value: T) {
        let size = std::mem::size_of::<T>();
        let offset = self.bytes.len();
        let value_bytes =
            unsafe { std::slice::from_raw_parts(&value as *const T as *const u8, size) };
        self.bytes.extend_from_slice(value_bytes);
        self.params.push((offset, size));
    }

    pub fn add_param_bytes(&mut self, value_bytes: &[u8]) {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(value_bytes);
        self.params.push((offset, value_bytes.len()));
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn total_size_in_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn param_layout(&self) -> &[(usize, usize)] {
        &self.params
    }

    pub(crate) fn data_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }
}

// an isolated execution context over a shared program.
//
// a task owns its activation memory and result buffer and is strictly
// single-threaded; any number of tasks may run over the same program on
// distinct host threads. a task is reusable: every run resets the scope
// and call stacks and the error flag.
pub struct ScriptTask {
    program: Arc<Program>,
    context: TaskContext,
    result: Vec<u8>,
}

impl ScriptTask {
    pub fn new(program: Arc<Program>) -> Self {
        Self::with_stack_size(program, DEFAULT_STACK_SIZE_IN_BYTES)
    }

    pub fn with_stack_size(program: Arc<Program>, stack_size_in_bytes: usize) -> Self {
        Self {
            program,
            context: TaskContext::new(stack_size_in_bytes),
            result: Vec::new(),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    // runs a registered function to completion on the caller's thread.
    //
    // the parameter buffer is trusted to match the function signature;
    // no runtime type check happens. an unknown id fails synchronously
    // without touching the activation memory.
    pub fn run_function(
        &mut self,
        function_id: u32,
        params: &ScriptParamBuffer,
    ) -> Result<(), TaskError> {
        let program = Arc::clone(&self.program);
        let (code, result_size, name) = match program.function(function_id) {
            Some(entry) => (entry.code, entry.result_size, entry.name.clone()),
            None => return Err(TaskError::UnknownFunction(function_id)),
        };

        log::debug!("task runs function '{}' (id {})", name, function_id);
        self.context.reset();
        self.result.clear();
        self.result.resize(result_size as usize, 0);
        let result_address = if self.result.is_empty() {
            std::ptr::null_mut()
        } else {
            self.result.as_mut_ptr()
        };

        let outcome = match code {
            FunctionCode::Script { entry } => bridge::run_script_entry(
                &mut self.context,
                &program,
                entry,
                None,
                result_address,
                params,
            ),
            FunctionCode::Native { .. } => bridge::run_native_function(
                &mut self.context,
                &program,
                function_id,
                result_address,
                params,
            ),
        };
        if let Err(error) = &outcome {
            log::debug!("task function '{}' failed: {}", name, error);
        }
        outcome
    }

    // runs a first-class function value the host received earlier, e.g.
    // a lambda returned out of its defining scope. the caller states the
    // result size, the signature of a function value is not recorded in
    // the program tables.
    pub fn run_function_info(
        &mut self,
        info: &RuntimeFunctionInfo,
        result_size: usize,
        params: &ScriptParamBuffer,
    ) -> Result<(), TaskError> {
        let program = Arc::clone(&self.program);
        self.context.reset();
        self.result.clear();
        self.result.resize(result_size, 0);
        let result_address = if self.result.is_empty() {
            std::ptr::null_mut()
        } else {
            self.result.as_mut_ptr()
        };
        bridge::call_function_info(&mut self.context, &program, info, result_address, params)
    }

    // pointer to the result buffer, valid until the next run. null for
    // a void function, undefined content when the task errored.
    pub fn result_ptr(&self) -> *const u8 {
        if self.result.is_empty() {
            std::ptr::null()
        } else {
            self.result.as_ptr()
        }
    }

    pub fn result_bytes(&self) -> &[u8] {
        &self.result
    }

    pub fn result_as<T: Copy>(&self) -> Option<T> {
        if self.result.len() == std::mem::size_of::<T>() {
            Some(unsafe { std::ptr::read_unaligned(self.result.as_ptr() as *const T) })
        } else {
            None
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.context.error()
    }
}
