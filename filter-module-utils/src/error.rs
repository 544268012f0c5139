// Copyright 2026 Origin Tap Module contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The error type shared between filter modules and the hosting server.

use thiserror::Error;

/// Errors produced by filter modules and the session seam.
///
/// Filter methods return `Box<Error>` so that results stay pointer-sized on the hot path.
#[derive(Debug, Error)]
pub enum Error {
    /// Module configuration was rejected at route setup time. The route must not start serving.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Configuration file could not be opened or read.
    #[error("failed reading configuration file")]
    ConfigFile(#[source] std::io::Error),

    /// Configuration file contents could not be deserialized.
    #[error("failed parsing configuration file")]
    ConfigParse(#[source] serde_yaml::Error),

    /// A later pipeline stage failed to accept forwarded data. Filters propagate this verbatim,
    /// the host owns the client-visible error behavior.
    #[error("downstream write failed: {0}")]
    Downstream(String),

    /// An HTTP element (method, URI, header name or value) could not be constructed.
    #[error("invalid HTTP element: {0}")]
    Http(String),
}

impl Error {
    /// Wraps a configuration failure message in a boxed error.
    pub fn configuration(message: impl Into<String>) -> Box<Self> {
        Box::new(Self::Configuration(message.into()))
    }

    /// Wraps a downstream forwarding failure message in a boxed error.
    pub fn downstream(message: impl Into<String>) -> Box<Self> {
        Box::new(Self::Downstream(message.into()))
    }

    /// Wraps an invalid HTTP element message in a boxed error.
    pub fn http(message: impl Into<String>) -> Box<Self> {
        Box::new(Self::Http(message.into()))
    }
}
