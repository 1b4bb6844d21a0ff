//! Decipher engine: catalog, extraction, interpretation and execution

pub mod catalog;
pub mod engine;
pub mod extractor;
pub mod interpreter;

#[cfg(test)]
pub(crate) mod testscript;

pub use catalog::{NOpKind, SigOpKind};
pub use engine::{CatalogState, NAction, NDecodeProgram, NTransform, SigStep, SignatureProgram, SlotSpec};
pub use extractor::{extract_n_program, extract_signature_program};
pub use interpreter::{AppendPlacement, SwitchMachine, TableTransducer};
