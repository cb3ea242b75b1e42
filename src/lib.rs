//! # single-annotation
//!
//! A specialized Rust library for hierarchical cell type classification of single-cell data,
//! part of the single-rust ecosystem.
//!
//! This crate assigns cell type labels to single-cell RNA-seq datasets using pre-trained or
//! user-trained classifiers. Classifiers form a forest: broad cell types at the roots (e.g.
//! "T cells") with nested subtypes beneath them (e.g. "CD4+ T cells"), and a subtype is only
//! tested on cells already positive for its parent. Expression data is kept in sparse
//! `CsrMatrix` assays; model inference runs on small dense blocks.
//!
//! ## Core Features
//!
//! - **Validated classifier records**: cell type, trained model, feature list, decision
//!   threshold, and optional parent, checked on construction and every mutation
//! - **Classifier registry**: ordered name lookup, lineage traversal, JSON persistence,
//!   and a bundled default set for common immune cell types
//! - **Hierarchical classification**: parent-gated evaluation with per-cell-type
//!   probability columns and deterministic ambiguity handling
//! - **Training and evaluation**: logistic marker models fitted from labeled datasets,
//!   scored with accuracy/sensitivity/specificity/AUC
//!
//! ## Quick Start
//!
//! Build a [`dataset::SingleCellDataset`] from your expression matrix, then call
//! [`annotation::classify`] with the bundled registry (or one loaded from disk) and a
//! [`classifier::registry::CellTypeRequest`]. The dataset comes back augmented with one
//! probability column per cell type plus `predicted_cell_type` and
//! `most_probable_cell_type` label columns.
//!
//! ## Module Organization
//!
//! - **[`classifier`]**: classifier records, trained model handles, and the registry
//! - **[`annotation`]**: the hierarchical classification engine, feature extraction,
//!   and the train/test surface
//! - **[`dataset`]**: the in-memory single-cell dataset the engine reads and augments
//! - **[`error`]**: typed errors shared across the crate

pub mod annotation;
pub mod classifier;
pub mod dataset;
pub mod error;
