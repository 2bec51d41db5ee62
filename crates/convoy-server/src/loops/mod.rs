//! Background loops for continuous processing.

pub mod conflict_loop;
