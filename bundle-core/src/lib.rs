#![doc = "code-bundle-core: job model, aggregation and PDF pipeline for code-bundle."]

//! This crate holds everything a bundling job does once an archive has been received:
//! extraction, aggregation of the source files, HTML → PDF rendering, merging with the
//! archive's own PDFs, and the contract for storing the result remotely.
//! The HTTP service, configuration loading and the Google Drive client live in the
//! `code-bundle` crate.
//!
//! # Usage
//! Build a [`pipeline::Pipeline`] once at start-up and run one job per archive.

pub mod aggregate;
pub mod config;
pub mod contract;
pub mod extract;
pub mod job;
pub mod merge;
pub mod pipeline;
pub mod render;
