//! Time capsules: content sealed until a date passes and a question is answered.
//!
//! A capsule moves Pending → Ready → Unlocked. `protocol` holds the pure state
//! machine and answer commitments; `routes` applies it inside transactions.

pub mod protocol;
pub mod routes;
