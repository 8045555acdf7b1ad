// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

// the program image of the C-Lambda VM and the surface the compiler
// back end (and the embedding host) uses to produce one:
//
// - `ProgramBuilder` registers types, native functions and their
//   constructors/destructors, and assembles script functions through
//   `CodeWriter`.
// - `Program` is the immutable result: the flat instruction list plus
//   the function/type/native tables. cross references are numeric ids,
//   so a program can be shared read-only between any number of tasks.

pub mod adapters;
pub mod builder;
pub mod program;
pub mod static_context;
pub mod utils;

use thiserror::Error;

// registration and assembly mistakes are rejected when the program is
// built, the execution engine performs no signature checking at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown type id: {0}")]
    UnknownType(u32),

    #[error("unknown function id: {0}")]
    UnknownFunction(u32),

    #[error("duplicated type name: {0}")]
    DuplicateTypeName(String),

    #[error("function {0} is not a native function")]
    NotNative(u32),

    #[error("instruction position {0} is out of range")]
    InvalidCodePosition(usize),

    #[error("instruction at position {0} takes no jump target")]
    NotAJump(usize),
}
