//! Galena conformance stack tester.
//!
//! The cross-language acceptance suite for Galena bindings is delivered as
//! data: a sequence of instruction tuples stored in the database under a
//! caller-supplied key prefix. This crate implements the stack machine that
//! reads those instructions, executes them against the binding surface, and
//! writes its results back into the database where the external harness
//! diffs them against a reference run.
//!
//! The interesting property of the machine is that its stack is *deferred*:
//! every slot holds a [`pending::Pending`] database result rather than an
//! eager value, so many operations can be in flight while the program
//! counter advances strictly serially.

pub mod args;
pub mod command;
pub mod constants;
pub mod error;
pub mod logging;
pub mod machine;
pub mod pending;
pub mod stack;
pub mod value;
