// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

// the data movement and member access instructions.

use ffscript_isa::accessor::MemberAccessor;
use ffscript_isa::instruction::AccessorChain;
use ffscript_isa::{HostMutPtr, HostPtr};

use crate::context::TaskContext;
use crate::processor::{fail, HandleResult};
use crate::TaskError;

// copies `value_size` bytes from an absolute host address into a frame slot.
pub fn write_value(
    context: &mut TaskContext,
    source: HostPtr,
    value_size: u32,
    target_offset: i32,
) -> HandleResult {
    if source.0.is_null() {
        return fail(context, TaskError::NullDereference);
    }
    match context.write_from_ptr(target_offset, source.0, value_size as usize) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}

pub fn write_value_from_offset(
    context: &mut TaskContext,
    source_offset: i32,
    value_size: u32,
    target_offset: i32,
) -> HandleResult {
    let source = match context.absolute_address(source_offset) {
        Ok(pointer) => pointer,
        Err(error) => return fail(context, error),
    };
    match context.write_from_ptr(target_offset, source, value_size as usize) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}

// follows the pointer stored at `target_ref_offset` and writes through
// it. the pointed-to storage may live outside the activation memory,
// e.g. the caller's result slot reached through the reserved
// return-address slot.
pub fn write_value_to_ref(
    context: &mut TaskContext,
    source_offset: i32,
    value_size: u32,
    target_ref_offset: i32,
) -> HandleResult {
    let destination = match context.read_address_slot(target_ref_offset) {
        Ok(address) => address,
        Err(error) => return fail(context, error),
    };
    if destination == 0 {
        return fail(context, TaskError::NullDereference);
    }
    let source = match context.absolute_address(source_offset) {
        Ok(pointer) => pointer,
        Err(error) => return fail(context, error),
    };
    unsafe {
        std::ptr::copy(source, destination as *mut u8, value_size as usize);
    }
    HandleResult::Move
}

pub fn lea_address_to_address(
    context: &mut TaskContext,
    source: HostPtr,
    target: HostMutPtr,
) -> HandleResult {
    if target.0.is_null() {
        return fail(context, TaskError::NullDereference);
    }
    unsafe {
        std::ptr::write_unaligned(target.0 as *mut usize, source.as_usize());
    }
    HandleResult::Move
}

pub fn lea_address_to_offset(
    context: &mut TaskContext,
    source: HostPtr,
    target_offset: i32,
) -> HandleResult {
    match context.lea(target_offset, source.as_usize()) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}

pub fn lea_offset_to_address(
    context: &mut TaskContext,
    source_offset: i32,
    target: HostMutPtr,
) -> HandleResult {
    if target.0.is_null() {
        return fail(context, TaskError::NullDereference);
    }
    let source = match context.absolute_address(source_offset) {
        Ok(pointer) => pointer,
        Err(error) => return fail(context, error),
    };
    unsafe {
        std::ptr::write_unaligned(target.0 as *mut usize, source as usize);
    }
    HandleResult::Move
}

pub fn lea_offset_to_offset(
    context: &mut TaskContext,
    source_offset: i32,
    target_offset: i32,
) -> HandleResult {
    let source = match context.absolute_address(source_offset) {
        Ok(pointer) => pointer,
        Err(error) => return fail(context, error),
    };
    match context.lea(target_offset, source as usize) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}

// folds an accessor chain into an address. the first step establishes
// the base, every further step transforms the running address.
fn evaluate_accessors(
    context: &TaskContext,
    accessors: &AccessorChain,
) -> Result<*const u8, TaskError> {
    let mut address: *const u8 = std::ptr::null();
    for accessor in accessors {
        match accessor {
            MemberAccessor::ContextBase => {
                address = context.absolute_address(0)?;
            }
            MemberAccessor::Global(pointer) => {
                address = pointer.0;
            }
            MemberAccessor::Offset(distance) => {
                if address.is_null() {
                    return Err(TaskError::NullDereference);
                }
                address = address.wrapping_offset(*distance as isize);
            }
            MemberAccessor::Dereference => {
                if address.is_null() {
                    return Err(TaskError::NullDereference);
                }
                address = unsafe { std::ptr::read_unaligned(address as *const *const u8) };
            }
        }
    }
    if address.is_null() {
        Err(TaskError::NullDereference)
    } else {
        Ok(address)
    }
}

pub fn read_member_value(
    context: &mut TaskContext,
    accessors: &AccessorChain,
    value_size: u32,
    target_offset: i32,
) -> HandleResult {
    let address = match evaluate_accessors(context, accessors) {
        Ok(address) => address,
        Err(error) => return fail(context, error),
    };
    match context.write_from_ptr(target_offset, address, value_size as usize) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}

pub fn lea_member_address(
    context: &mut TaskContext,
    accessors: &AccessorChain,
    target_offset: i32,
) -> HandleResult {
    let address = match evaluate_accessors(context, accessors) {
        Ok(address) => address,
        Err(error) => return fail(context, error),
    };
    match context.lea(target_offset, address as usize) {
        Ok(()) => HandleResult::Move,
        Err(error) => fail(context, error),
    }
}
