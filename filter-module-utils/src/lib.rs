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

//! # Filter module helpers
//!
//! This crate contains the pieces shared by HTTP filter modules: the [`RequestFilter`] trait
//! with its request, response header and response body phases, the [`session::SessionWrapper`]
//! seam towards the hosting server, and configuration loading via [`FromYaml`].
//!
//! The hosting server composes the configured filter modules into an ordered pipeline at route
//! setup time and calls each phase at the corresponding point of the request lifecycle. Response
//! headers are always processed before the first body chunk, body chunks arrive in delivery
//! order, and all per-request state lives in the filter's `CTX` type.

mod error;
pub mod session;

use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use serde::de::DeserializeOwned;

pub use error::Error;
use session::{ResponseHeader, SessionWrapper};

/// Request filter result indicating how the current request should be processed further
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RequestFilterResult {
    /// Response has been sent, no further processing should happen. Other phases should not be
    /// triggered.
    ResponseSent,

    /// Request has been handled and further request filters should not run. Response hasn't been
    /// sent however, the next phase should deal with that.
    Handled,

    /// Request filter could not handle this request, next request filter should run if it exists.
    #[default]
    Unhandled,
}

/// Trait to be implemented by filter modules.
///
/// Only `request_filter` is mandatory. The response phases default to exact pass-through, so a
/// module that never activated is indistinguishable from no module being installed.
#[async_trait]
pub trait RequestFilter {
    /// Configuration type of this handler.
    type Conf;

    /// Per-request state of this handler. A new value is created for every request and is never
    /// shared or reused across requests.
    type CTX;

    /// Creates a new state object for a request.
    fn new_ctx() -> Self::CTX;

    /// Creates a new instance of the handler from its configuration.
    fn new(conf: Self::Conf) -> Result<Self, Box<Error>>
    where
        Self: Sized,
        Self::Conf: TryInto<Self, Error = Box<Error>>,
    {
        conf.try_into()
    }

    /// Handles the current request.
    ///
    /// This is essentially identical to the `request_filter` method but is supposed to be called
    /// when there is only a single handler. Consequently, its result can be returned directly.
    async fn handle(
        &self,
        session: &mut impl SessionWrapper,
        ctx: &mut Self::CTX,
    ) -> Result<bool, Box<Error>>
    where
        Self::CTX: Send,
    {
        let result = self.request_filter(session, ctx).await?;
        Ok(result == RequestFilterResult::ResponseSent)
    }

    /// Handler to run during the request phase, before the request is dispatched upstream.
    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>>;

    /// Handler to run when the response header is about to be forwarded downstream.
    ///
    /// The host guarantees that this runs to completion before the first body chunk is
    /// forwarded.
    fn response_filter(
        &self,
        _session: &mut impl SessionWrapper,
        _response: &mut ResponseHeader,
        _ctx: &mut Self::CTX,
    ) {
    }

    /// Handler to run for each response body chunk, in delivery order.
    ///
    /// `end_of_stream` is `true` for the terminal chunk of the response. Implementations forward
    /// data to the next stage through [`SessionWrapper::write_response_body`] and may emit
    /// chunks not present in the original sequence; exactly one forwarded chunk per response
    /// must carry the end-of-stream flag. The default implementation forwards everything
    /// unchanged.
    async fn response_body_filter(
        &self,
        session: &mut impl SessionWrapper,
        data: Option<Bytes>,
        end_of_stream: bool,
        _ctx: &mut Self::CTX,
    ) -> Result<(), Box<Error>>
    where
        Self::CTX: Send,
    {
        session.write_response_body(data, end_of_stream).await
    }
}

/// Trait for configuration structures that can be loaded from YAML data. This trait has a
/// blanket implementation for any structure implementing [`serde::Deserialize`].
pub trait FromYaml {
    /// Loads configuration from YAML data.
    fn from_yaml(input: impl AsRef<str>) -> Result<Self, Box<Error>>
    where
        Self: Sized;

    /// Loads configuration from a YAML file.
    fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, Box<Error>>
    where
        Self: Sized;
}

impl<D> FromYaml for D
where
    D: DeserializeOwned + Debug,
{
    fn from_yaml(input: impl AsRef<str>) -> Result<Self, Box<Error>> {
        let conf =
            serde_yaml::from_str(input.as_ref()).map_err(|err| Box::new(Error::ConfigParse(err)))?;
        trace!("Loaded configuration: {conf:#?}");

        Ok(conf)
    }

    fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, Box<Error>> {
        let file = File::open(path.as_ref()).map_err(|err| Box::new(Error::ConfigFile(err)))?;
        let reader = BufReader::new(file);

        let conf =
            serde_yaml::from_reader(reader).map_err(|err| Box::new(Error::ConfigParse(err)))?;
        trace!("Loaded configuration file: {conf:#?}");

        Ok(conf)
    }
}
