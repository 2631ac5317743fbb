//! Typed error/exit-code surfaces for the three public subsystems.
//!
//! Mirrors the C++ enums the reference daemon returns from its public API:
//! callers match on a small fixed set of variants rather than parsing strings.

use thiserror::Error;

/// Exit codes returned by [`crate::resource::ResourceAccounter`]'s public surface.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccounterError {
    #[error("operation failed")]
    Failed,
    #[error("no resource matches the given path")]
    MissPath,
    #[error("unknown view token")]
    MissView,
    #[error("view token belongs to a different caller")]
    UnauthView,
    #[error("unknown application")]
    MissApp,
    #[error("application holds no usages in this view")]
    MissUsages,
    #[error("unknown working mode")]
    MissAwm,
    #[error("application already holds a booking in this view")]
    AppUsages,
    #[error("requested amount exceeds availability")]
    UsageExc,
    #[error("resource was never registered")]
    NotRegistered,
    #[error("malformed resource path")]
    InvalidPath,
    #[error("booking arithmetic overflowed")]
    Overflow,
    #[error("failed to initialize sync session")]
    SyncInit,
    #[error("sync session view is inconsistent")]
    SyncView,
    #[error("a sync session is already in progress")]
    SyncStart,
}

pub type AccounterResult<T> = Result<T, AccounterError>;

/// Exit codes returned by [`crate::app::Application`]'s public surface.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("application is disabled")]
    Disabled,
    #[error("application has already finished")]
    Finished,
    #[error("working mode not found")]
    WmNotFound,
    #[error("working mode rejected by the resource accounter")]
    WmRejected,
    #[error("enabled working-mode list changed")]
    WmEnabChanged,
    #[error("enabled working-mode list unchanged")]
    WmEnabUnchanged,
    #[error("application is not in the expected status")]
    StatusNotExp,
    #[error("schedule request aborted")]
    Abort,
    #[error("task-graph semaphore error")]
    TgSemError,
    #[error("task-graph file error")]
    TgFileError,
}

pub type AppResult<T> = Result<T, AppError>;

/// Exit codes returned by [`crate::validator::PartitionValidator`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorError {
    #[error("no partition satisfies every skimmer")]
    NoPartition,
    #[error("a skimmer failed to commit/rollback its state")]
    SkimmerFail,
    #[error("unspecified skimmer error")]
    GenericError,
}

pub type ValidatorResult<T> = Result<T, ValidatorError>;
