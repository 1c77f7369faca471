// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pressgate Proxy — bridges an infrastructure printer (the cloud side that
// accumulates jobs) to a local output device reachable over IPP, IPPS, or
// raw AppSocket TCP.  Jobs are pulled, printed, and reported back; nothing
// is rendered or transcoded along the way except compression framing.

pub mod backoff;
pub mod client;
pub mod events;
pub mod jobs;
pub mod probe;
pub mod proto;
pub mod proxy;
pub mod reconcile;
pub mod registrar;
pub mod shutdown;
pub mod source;
pub mod transport;
pub mod uri;
pub mod worker;

pub use client::{IppSession, PasswordSupplier};
pub use jobs::JobTable;
pub use proxy::run;
pub use shutdown::Shutdown;
pub use uri::PrinterUri;
