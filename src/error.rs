//! Rich diagnostic error types for burl.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for burl.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum BurlError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Learn(#[from] LearnError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("failed to read triple file: {path}")]
    #[diagnostic(
        code(burl::graph::read),
        help("Check that the path in [paths] exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relation capacity exceeded: cannot register \"{label}\" beyond {capacity} relations")]
    #[diagnostic(
        code(burl::graph::relation_capacity),
        help(
            "Relation ids and their inverses share one 15-bit path slot. \
             Split the dataset or merge rarely used relations."
        )
    )]
    RelationCapacity { label: String, capacity: u64 },

    #[error("relation path holds at most {max} hops, got {hops}")]
    #[diagnostic(
        code(burl::graph::path_too_long),
        help("Rules are limited to four hops including the head.")
    )]
    PathTooLong { hops: usize, max: usize },

    #[error("relation id {id} does not fit a 15-bit path slot")]
    #[diagnostic(
        code(burl::graph::relation_out_of_range),
        help("Relation ids must be in 1..=32767.")
    )]
    RelationOutOfRange { id: u64 },
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("failed to read rule file: {path}")]
    #[diagnostic(
        code(burl::rule::read),
        help("Check that the rule file exists. Rule files are written by `burl learn`.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write rule file: {path}")]
    #[diagnostic(
        code(burl::rule::write),
        help("Ensure the output directory exists and is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule line: {line}")]
    #[diagnostic(
        code(burl::rule::parse),
        help(
            "Rule lines are `predicted<TAB>correct<TAB>confidence<TAB>head <= body`, \
             with atoms written as `relation(left,right)`."
        )
    )]
    Parse { line: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(burl::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(burl::config::parse),
        help("Check the TOML syntax. `burl init-config <file>` writes a complete default file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(burl::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {field}: {message}")]
    #[diagnostic(code(burl::config::invalid), help("Fix the named field and retry."))]
    Invalid { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Learn errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LearnError {
    #[error("training graph is empty")]
    #[diagnostic(
        code(burl::learn::empty_graph),
        help("Point [paths] training at a non-empty triple file.")
    )]
    EmptyGraph,

    #[error("single relation \"{label}\" does not occur in the training data")]
    #[diagnostic(
        code(burl::learn::unknown_single_relation),
        help("Remove it from [learn] single_relations or fix its spelling.")
    )]
    UnknownSingleRelation { label: String },

    #[error("the bandit was asked for a slot before relevant scores were computed")]
    #[diagnostic(
        code(burl::learn::dice_not_ready),
        help("Call `compute_relevant_scores` before `ask`.")
    )]
    DiceNotReady,

    #[error("failed to write {what}: {path}")]
    #[diagnostic(
        code(burl::learn::write),
        help("Ensure the output directory exists and is writable.")
    )]
    Write {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {what} thread")]
    #[diagnostic(
        code(burl::learn::spawn),
        help("The system refused a new thread. Lower worker_threads and retry.")
    )]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to store rule snapshot")]
    #[diagnostic(
        code(burl::learn::snapshot),
        help("Ensure the [paths] output prefix points to a writable directory.")
    )]
    Snapshot {
        #[source]
        source: RuleError,
    },

    #[error("{what} thread panicked")]
    #[diagnostic(
        code(burl::learn::thread_panicked),
        help("This is a bug. Re-run with RUST_LOG=debug and report the log.")
    )]
    ThreadPanicked { what: &'static str },
}

// ---------------------------------------------------------------------------
// Apply errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ApplyError {
    #[error("failed to write predictions: {path}")]
    #[diagnostic(
        code(burl::apply::write),
        help("Ensure the output directory exists and is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("prediction worker panicked")]
    #[diagnostic(
        code(burl::apply::worker_panicked),
        help("This is a bug. Re-run with RUST_LOG=debug and report the log.")
    )]
    WorkerPanicked,
}

// ---------------------------------------------------------------------------
// Eval errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error("failed to read prediction file: {path}")]
    #[diagnostic(
        code(burl::eval::read),
        help("Prediction files are written by `burl apply`.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed prediction file {path} at line {line}: {message}")]
    #[diagnostic(
        code(burl::eval::parse),
        help(
            "Each query takes three lines: the triple, `Heads: ...` and `Tails: ...` \
             with tab-separated candidate/score pairs."
        )
    )]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
}

/// Convenience result type for burl operations.
pub type BurlResult<T> = std::result::Result<T, BurlError>;
