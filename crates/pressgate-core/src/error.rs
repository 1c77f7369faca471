// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Pressgate.

use thiserror::Error;

/// Top-level error type for all Pressgate operations.
#[derive(Debug, Error)]
pub enum PressgateError {
    // -- URI / configuration --
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    // -- Network --
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("TLS error: {0}")]
    Tls(String),

    // -- Protocol --
    #[error("malformed IPP message: {0}")]
    Protocol(String),

    /// The peer answered with an IPP status code outside the success range.
    /// `status` keeps the raw code so callers can branch on specific values
    /// (e.g. `client-error-not-fetchable`).
    #[error("IPP status 0x{status:04x} from {operation}")]
    IppStatus { operation: &'static str, status: u16 },

    // -- Proxy lifecycle --
    #[error("registration failed: {0}")]
    Registration(String),

    #[error("local device error: {0}")]
    Device(String),

    #[error("shutting down")]
    Shutdown,

    // -- I/O --
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PressgateError {
    /// IPP status code carried by this error, if any.
    pub fn ipp_status(&self) -> Option<u16> {
        match self {
            Self::IppStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PressgateError>;
