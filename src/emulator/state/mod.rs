//! Terminal State Core: transaction/batch lifecycle, ID allocation, and
//! persistence for the emulator.
//!
//! Split the way the teacher's `db` module tree is split (`src/db/mod.rs`):
//! focused files re-exported from here, with the teacher's Diesel/SQL layer
//! replaced by an in-process actor since this system has no relational
//! database backing it.

mod core;
mod errors;
mod store;
mod types;

pub use self::{
    core::StateCore,
    errors::StateError,
    store::Store,
    types::{
        Amounts, Batch, CardAcquisition, Counters, Identifier, NewIds, Statistics, Transaction,
        TransactionKind, TransactionStatus,
    },
};
