//! Exception-handler records and the throw marker
//!
//! The original non-local jump is modelled as an explicit resumption
//! token: a handler saves the slot that receives the did-throw flag, the
//! code offset to resume at, and the context that was current at install
//! time. Throwing records the exception value on the context's shared
//! cell and surfaces [`Thrown`] as the error half of every primitive
//! result; the dispatch loop reacts by peeking (not popping) the
//! innermost handler and resuming there with the flag set.
//!
//! Handler records obey strict stack discipline, including across nested
//! interpreter invocations. Throwing with an empty handler stack is the
//! embedder's condition — the loop surfaces it as an unhandled-exception
//! error rather than consulting any handler.

use vireo_bytecode::Param;

use crate::vm::context::ExecutionContext;

/// Marker for a signaled scripted failure
///
/// The thrown value itself lives in the context's exception cell;
/// carrying a marker keeps primitive results `Copy`-cheap on the error
/// path and makes "record then unwind" a single `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thrown;

/// One installed exception-catch point
#[derive(Debug, Clone)]
pub struct Handler {
    /// Slot that receives the boolean did-throw flag
    pub target: Param,
    /// Code offset to resume at, just past the install instruction
    pub resume: usize,
    /// Context current when the handler was installed
    pub scope: ExecutionContext,
}
