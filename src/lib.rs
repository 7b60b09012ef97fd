//! traceguard: PR traceability audit engine
//!
//! Investigates a pull request for compliance evidence — ticket references,
//! requirement/spec documents, test coverage, automated review tools — and
//! publishes a confidence-scored report as a single, edited-in-place PR
//! comment. Designed to run inside CI with all inputs supplied through
//! flags or environment variables.

pub mod ai;
pub mod config;
pub mod coverage;
pub mod docs;
pub mod engine;
pub mod exempt;
pub mod findings;
pub mod github;
pub mod publish;
pub mod report;
pub mod review;
pub mod scope;
pub mod score;
pub mod tickets;
