//! Domain model integration tests
//!
//! Entity validation, modification tracking, foreign key references and the
//! wire form of entities, against the registered test domain.

mod conditions;
mod entities;
