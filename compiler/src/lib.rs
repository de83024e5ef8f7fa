// axc — Axis compiler core
//
// Library root. One module per compiler phase, in pipeline order.

pub mod ast;
pub mod axes;
pub mod diag;
pub mod id;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod types;

pub mod analyze;
pub mod carrier;
pub mod inline;
pub mod lir;
pub mod lower;
pub mod stamp;
pub mod verify;

pub mod pass;
pub mod pipeline;
