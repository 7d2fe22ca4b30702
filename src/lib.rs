//! Voltage: a live-editable audio node language.
//!
//! Node bodies are compiled to IR ([`dsl`], [`codegen`], [`library`]),
//! linked to native code or an interpreter ([`jit`]) and run in a graph of
//! schematics whose code can be replaced while it plays ([`runtime`]).

pub mod codegen;
pub mod config;
pub mod dsl;
pub mod jit;
pub mod library;
pub mod runtime;
