// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use crate::memory::ActivationMemory;
use crate::scope::ScopeFrame;
use crate::TaskError;

// where the epilogue of a function returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnAddress {
    // continue at this instruction in the same interpretation loop.
    Code(usize),
    // terminate the interpretation loop that pushed the frame, resuming
    // the cursor at the given instruction. this is the sentinel the
    // nested (host-reentrant) calls and the task facade insert.
    Host(usize),
}

// one entry of the call stack, pushed when a script function is invoked.
#[derive(Debug)]
pub struct CallFrame {
    pub return_address: ReturnAddress,
    pub prior_frame_base: usize,
    pub prior_frame_size: usize,
    // absolute address of the caller's result slot (or the task result
    // buffer for the synthetic root frame).
    pub result_address: usize,
}

// the per-task execution context: activation memory, the scope and call
// stacks, the instruction cursor and the error flag.
//
// the context is threaded explicitly through every instruction handler,
// there is no global or thread-local "current context".
//
// the activation memory grows upwards in function frames; the current
// frame is described by `frame_base` and `frame_size`:
//
// |                    |
// |                    | <-- free
// |--------------------| <-- frame_base + frame_size (the frame top)
// | scope 1 data/code  |
// |--------------------|
// | scope 0 data/code  | <-- regions allocated by EnterScope
// |--------------------| <-- frame_base (offset 0 of the running function)
// | caller frame       |
// |--------------------|
// |   ...              |
// \--------------------/ <-- activation memory start
//
// instruction offsets are relative to `frame_base`. a call pushes a
// call frame, moves `frame_base` to the old frame top and restarts
// `frame_size` at zero; the epilogue restores both.
pub struct TaskContext {
    pub memory: ActivationMemory,
    pub scope_stack: Vec<ScopeFrame>,
    pub call_stack: Vec<CallFrame>,
    // the instruction cursor: position of the next instruction to execute.
    pub pc: usize,
    frame_base: usize,
    frame_size: usize,
    error: Option<TaskError>,
}

impl TaskContext {
    pub fn new(stack_size_in_bytes: usize) -> Self {
        Self {
            memory: ActivationMemory::new(stack_size_in_bytes),
            scope_stack: Vec::new(),
            call_stack: Vec::new(),
            pc: 0,
            frame_base: 0,
            frame_size: 0,
            error: None,
        }
    }

    // prepares the context for a fresh run; the buffer content is left
    // as is, a program never reads a slot it did not write.
    pub fn reset(&mut self) {
        self.scope_stack.clear();
        self.call_stack.clear();
        self.pc = 0;
        self.frame_base = 0;
        self.frame_size = 0;
        self.error = None;
    }

    pub fn frame_base(&self) -> usize {
        self.frame_base
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_top(&self) -> usize {
        self.frame_base + self.frame_size
    }

    // translates a frame-relative offset into a buffer position.
    pub fn frame_position(&self, offset: i32) -> Result<usize, TaskError> {
        let position = self.frame_base as i64 + offset as i64;
        if position < 0 || position as usize >= self.memory.size_in_bytes() {
            Err(TaskError::InvalidAddress)
        } else {
            Ok(position as usize)
        }
    }

    // the absolute addresses handed to native callables; valid until the
    // owning frame exits.
    pub fn absolute_address(&self, offset: i32) -> Result<*const u8, TaskError> {
        Ok(self.memory.get_ptr(self.frame_position(offset)?))
    }

    pub fn absolute_address_mut(&mut self, offset: i32) -> Result<*mut u8, TaskError> {
        let position = self.frame_position(offset)?;
        Ok(self.memory.get_mut_ptr(position))
    }

    pub fn write_from_ptr(
        &mut self,
        target_offset: i32,
        source: *const u8,
        length_in_bytes: usize,
    ) -> Result<(), TaskError> {
        let position = self.frame_position(target_offset)?;
        self.memory.write(position, source, length_in_bytes)
    }

    pub fn lea(&mut self, target_offset: i32, address_value: usize) -> Result<(), TaskError> {
        let position = self.frame_position(target_offset)?;
        self.memory.lea(position, address_value)
    }

    pub fn read_address_slot(&self, offset: i32) -> Result<usize, TaskError> {
        let position = self.frame_position(offset)?;
        self.memory.read_address(position)
    }

    // ---- scope stack ----

    pub fn push_scope_frame(&mut self, constructor_count: u32) {
        self.scope_stack.push(ScopeFrame::new(constructor_count));
    }

    pub fn pop_scope_frame(&mut self) -> Result<ScopeFrame, TaskError> {
        self.scope_stack.pop().ok_or(TaskError::InvalidAddress)
    }

    pub fn current_scope_frame_mut(&mut self) -> Option<&mut ScopeFrame> {
        self.scope_stack.last_mut()
    }

    pub fn current_scope_frame(&self) -> Option<&ScopeFrame> {
        self.scope_stack.last()
    }

    // extends the current frame by the data and code regions of a scope.
    // the actually allocated amount is recorded on the scope frame, the
    // matching unallocate consumes the record.
    pub fn scope_allocate(&mut self, data_size: u32, code_size: u32) -> Result<(), TaskError> {
        let total = (data_size + code_size) as usize;
        if self.frame_top() + total > self.memory.size_in_bytes() {
            return Err(TaskError::OutOfMemory);
        }
        self.frame_size += total;
        match self.scope_stack.last_mut() {
            Some(frame) => {
                frame.allocated_bytes += total as u32;
                Ok(())
            }
            None => Err(TaskError::InvalidAddress),
        }
    }

    pub fn scope_unallocate(&mut self) -> Result<(), TaskError> {
        let frame = self
            .scope_stack
            .last_mut()
            .ok_or(TaskError::InvalidAddress)?;
        let allocated = frame.allocated_bytes as usize;
        frame.allocated_bytes = 0;
        if allocated > self.frame_size {
            return Err(TaskError::InvalidAddress);
        }
        self.frame_size -= allocated;
        Ok(())
    }

    // ---- call stack ----

    pub fn push_call_frame(&mut self, return_address: ReturnAddress, result_address: usize) {
        self.call_stack.push(CallFrame {
            return_address,
            prior_frame_base: self.frame_base,
            prior_frame_size: self.frame_size,
            result_address,
        });
        self.frame_base += self.frame_size;
        self.frame_size = 0;
    }

    pub fn pop_call_frame(&mut self) -> Option<CallFrame> {
        let frame = self.call_stack.pop()?;
        self.frame_base = frame.prior_frame_base;
        self.frame_size = frame.prior_frame_size;
        Some(frame)
    }

    // ---- error flag ----

    // records the first error; later ones are side effects of the
    // unwinding itself and are dropped.
    pub fn set_error(&mut self, error: TaskError) {
        if self.error.is_none() {
            log::trace!("task error recorded: {}", error);
            self.error = Some(error);
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }
}
