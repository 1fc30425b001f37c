use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{feed::FeedError, repos::RepoError},
    config::LoadError,
    domain::error::DomainError,
    infra::{atproto::store::StoreError, atproto::uri::LocatorError, error::InfraError},
};

/// A failure together with every error in its source chain, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// `outer: inner: innermost`, skipping messages already contained in their parent.
    pub fn summary(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            if parts.last().is_some_and(|prev| prev.ends_with(message.as_str())) {
                continue;
            }
            parts.push(message);
        }
        parts.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("failed to load configuration")]
    Config(#[from] LoadError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn is_not_found(&self) -> bool {
        match self {
            AppError::Store(err) => err.is_not_found(),
            AppError::Repo(err) => err.is_not_found(),
            _ => false,
        }
    }

    fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::Domain(DomainError::Validation { .. })
                | AppError::Locator(_)
                | AppError::Config(_)
                | AppError::Feed(FeedError::InvalidDid(_))
                | AppError::Store(
                    StoreError::Validation(_)
                        | StoreError::MissingReference { .. }
                        | StoreError::InvalidKey { .. }
                )
        )
    }

    fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AppError::Repo(RepoError::Unauthorized(_))
                | AppError::Store(StoreError::Repo {
                    source: RepoError::Unauthorized(_),
                    ..
                })
        )
    }

    /// Process exit status for the CLI.
    pub fn exit_code(&self) -> i32 {
        if self.is_invalid_input() {
            2
        } else if self.is_unauthorized() {
            3
        } else if self.is_not_found() {
            4
        } else {
            1
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
