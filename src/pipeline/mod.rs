//! Pipeline stages for annotation extraction and classification.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the two I/O-bound stages (render, classify) sit
//! behind traits that tests replace.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ walk ──▶ render ──▶ assemble ──▶ classify
//! (bytes)  (lopdf)  (pdfium)   (correlate,   (LLM / gateway,
//!                               crop, encode)  labels)
//! ```
//!
//! 1. [`input`]    : load a path or URL into memory, check `%PDF` magic
//! 2. [`walk`]     : page sizes and content-bearing annotations, with `/IRT`
//! 3. [`render`]   : one page image per page at 1 px per PDF unit;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 4. [`assemble`] : ids, reply merging via [`correlate`], crops via
//!    [`crop`] and [`encode`]
//! 5. [`classify`] : one classifier call per record; [`labels`] parses the answer

pub mod assemble;
pub mod classify;
pub mod correlate;
pub mod crop;
pub mod encode;
pub mod input;
pub mod labels;
pub mod render;
pub mod walk;
