// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions.
// For more details, see the LICENSE, LICENSE.additional, and CONTRIBUTING files.

use crate::ADDRESS_SIZE_IN_BYTES;

// the wire shape a dynamic call packs its arguments into.
//
// a dynamic native function declares no fixed parameter list; instead the
// engine materializes one `SimpleVariant` per actual argument directly in
// activation memory and hands the callable a single parameter: the address
// of the `SimpleVariantArray` header. layout, starting at the call's
// begin-param offset:
//
// | array address (one pointer slot)  |
// | count (i32) | padding (4 bytes)   | <-- SimpleVariantArray
// | variant 0                         |
// | variant 1                         |
// | ...                               |

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SimpleVariant {
    // the registered type id of the argument, or -1 when unknown.
    pub script_type: i32,
    // NUL-terminated type name owned by the instruction.
    pub type_name: *const u8,
    pub size: i32,
    // address of the argument's storage.
    pub data: *mut u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SimpleVariantArray {
    pub size: i32,
    _padding: i32,
}

impl SimpleVariantArray {
    pub const HEADER_SIZE_IN_BYTES: usize = std::mem::size_of::<SimpleVariantArray>();

    pub fn new(size: i32) -> Self {
        Self { size, _padding: 0 }
    }

    // bytes needed for the pointer slot, the header and `count` variants.
    pub fn packed_size_in_bytes(count: usize) -> usize {
        ADDRESS_SIZE_IN_BYTES
            + Self::HEADER_SIZE_IN_BYTES
            + count * std::mem::size_of::<SimpleVariant>()
    }

    // # Safety
    //
    // `header` must point at a packed array with at least `index + 1` elements.
    pub unsafe fn element(header: *const SimpleVariantArray, index: usize) -> SimpleVariant {
        let first = (header as *const u8).add(Self::HEADER_SIZE_IN_BYTES) as *const SimpleVariant;
        std::ptr::read_unaligned(first.add(index))
    }
}
