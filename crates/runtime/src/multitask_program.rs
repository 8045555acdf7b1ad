// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use std::sync::Arc;
use std::thread::JoinHandle;

use ffscript_program::program::Program;

use crate::task::{ScriptParamBuffer, ScriptTask};
use crate::TaskError;

// runs functions of one shared program on dedicated host threads, one
// task per thread.
//
// the program image is immutable and shared through `Arc`; every task
// owns its activation memory, so the threads interact only through
// whatever the native callables touch on the host side.
pub struct MultitaskProgram {
    program: Arc<Program>,
}

impl MultitaskProgram {
    pub fn new(program: Arc<Program>) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    // spawns a host thread, runs the function on a fresh task and
    // yields the result bytes through the join handle.
    pub fn create_task_thread(
        &self,
        function_id: u32,
        params: ScriptParamBuffer,
    ) -> TaskThread {
        let program = Arc::clone(&self.program);
        let join_handle = std::thread::spawn(move || {
            let mut task = ScriptTask::new(program);
            task.run_function(function_id, &params)?;
            Ok(task.result_bytes().to_vec())
        });
        TaskThread { join_handle }
    }
}

pub struct TaskThread {
    pub join_handle: JoinHandle<Result<Vec<u8>, TaskError>>,
}
