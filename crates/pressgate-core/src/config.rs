// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Proxy configuration.

use serde::{Deserialize, Serialize};

/// Configuration handed to the proxy core by the outer command layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Infrastructure printer (or system service) URI.
    pub printer_uri: String,
    /// Local output device URI (`ipp://`, `ipps://`, or `socket://`).
    pub device_uri: String,
    /// Preferred output MIME type; `None` lets the proxy negotiate.
    pub output_format: Option<String>,
    /// User name placed in `requesting-user-name` on every request.
    pub username: String,
    /// Password for HTTP authentication, if the infrastructure requires one.
    pub password: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            printer_uri: String::new(),
            device_uri: String::new(),
            output_format: None,
            username: "anonymous".into(),
            password: None,
        }
    }
}
