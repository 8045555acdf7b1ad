// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use std::sync::Arc;

use ffscript_isa::native::{HostError, NativeFunction};

// the minimal adapter: a plain closure operating on the raw
// `(result, param_pointers)` protocol.
//
// richer adapters (typed signatures, method binding, overload glue) are
// the job of the host registration layer, the engine only needs the
// uniform shape.
struct NativeClosure<F>
where
    F: Fn(*mut u8, *const *mut u8) -> Result<(), HostError> + Send + Sync,
{
    function: F,
}

impl<F> NativeFunction for NativeClosure<F>
where
    F: Fn(*mut u8, *const *mut u8) -> Result<(), HostError> + Send + Sync,
{
    fn call(&self, result: *mut u8, params: *const *mut u8) -> Result<(), HostError> {
        (self.function)(result, params)
    }
}

pub fn native_fn<F>(function: F) -> Arc<dyn NativeFunction>
where
    F: Fn(*mut u8, *const *mut u8) -> Result<(), HostError> + Send + Sync + 'static,
{
    Arc::new(NativeClosure { function })
}

// the engine-provided destructor for the function-object type: releases
// the captured environment of the `RuntimeFunctionInfo` the single
// parameter points at. the compiler registers it against the type so
// that every slot holding a function value is cleaned up on scope exit
// (unless the value is being returned, in which case the destructor is
// elided and ownership moves to the caller).
pub fn function_info_destructor() -> Arc<dyn NativeFunction> {
    native_fn(|_result, params| {
        unsafe {
            let info = param_as::<ffscript_isa::function_info::RuntimeFunctionInfo>(params, 0);
            (*info).release_capture();
        }
        Ok(())
    })
}

// reads the address of parameter `index` out of the parameter pointer
// array, typed.
//
// # Safety
//
// `params` must point at an array of at least `index + 1` parameter
// addresses and the addressed storage must hold a valid `T`.
pub unsafe fn param_as<T>(params: *const *mut u8, index: usize) -> *mut T {
    *params.add(index) as *mut T
}

// writes a value into the result slot of a call.
//
// # Safety
//
// `result` must point at at least `size_of::<T>()` writable bytes.
pub unsafe fn write_result<T>(result: *mut u8, value: T) {
    std::ptr::write_unaligned(result as *mut T, value);
}
