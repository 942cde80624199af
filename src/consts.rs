//! VM parameters

/* REGISTER BANDS */

/// Total logical register count; a register operand byte addresses the
/// whole space.
pub const REGISTER_COUNT: usize = 256;

/// First global-band register.
pub const GLOBAL_BASE: usize = 0x00;

/// Global-band slot count (module-level bindings).
pub const GLOBAL_COUNT: usize = 64;

/// First frame-band register (parameters and locals of the active
/// call).
pub const FRAME_BASE: usize = GLOBAL_BASE + GLOBAL_COUNT;

/// Frame-band slot count per active call.
pub const FRAME_COUNT: usize = 128;

/// First temp-band register (expression intermediates, LIFO per scope
/// level).
pub const TEMP_BASE: usize = FRAME_BASE + FRAME_COUNT;

/// Temp-band slot count.
pub const TEMP_COUNT: usize = 48;

/// First module-band register (imported namespaces).
pub const MODULE_BASE: usize = TEMP_BASE + TEMP_COUNT;

/// Module-band slot count.
pub const MODULE_COUNT: usize = 16;

/* TYPED SHADOW BANKS */

/// Unboxed slots per typed bank. Far fewer than the logical register
/// count; the allocator attaches shadows to the registers that earn
/// them.
pub const TYPED_BANK_SLOTS: usize = 32;

/// Number of typed banks (`i32`, `i64`, `u32`, `u64`, `f64`, `bool`).
pub const TYPED_BANK_COUNT: usize = 6;

/* EXECUTION LIMITS */

/// Call-frame depth limit; exceeding it raises a recursion trap.
pub const FRAME_DEPTH_LIMIT: usize = 512;

/// Try-frame depth limit.
pub const TRY_DEPTH_LIMIT: usize = 256;

/// Constant-pool capacity per chunk (a pool index is encoded in 16
/// bits).
pub const CONST_POOL_LIMIT: usize = u16::MAX as usize;

/* MEMORY MANAGER */

/// Starting heap-growth trigger in bytes, unless overridden by
/// `ORUS_GC_INITIAL_THRESHOLD` or [`crate::VmParams`].
pub const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;

/// Multiplicative threshold adjustment applied after each collection.
pub const GC_GROWTH_FACTOR: usize = 2;

/// Hard heap ceiling in bytes; allocation past it is an out-of-memory
/// halt.
pub const HEAP_LIMIT: usize = 256 * 1024 * 1024;

/* COMPILER TUNABLES */

/// Iteration-count ceiling for small-loop unrolling.
pub const UNROLL_LIMIT: i64 = 8;

/// Arithmetic-intensity cutoff above which the smart allocator prefers
/// a typed shadow. A performance knob, not a correctness parameter.
pub const SMART_TYPED_THRESHOLD: usize = 3;

/// Distance ceiling for one-byte jump offsets.
pub const SHORT_JUMP_MAX: usize = u8::MAX as usize;
