//! Pipeline stages, leaf-first:
//! context -> state -> variables -> plan -> confirm -> evidence -> audit.

pub mod audit;
pub mod confirm;
pub mod context;
pub mod evidence;
pub mod pipeline;
pub mod plan;
pub mod state;
pub mod variables;
