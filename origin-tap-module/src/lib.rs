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

//! # Origin Tap Module
//!
//! This crate allows redirecting individual requests to a different upstream origin. When a
//! request carries a `tap` header whose value matches the configured trigger, the module
//! overwrites the per-request upstream host before upstream selection runs and appends an
//! HTML-comment trailer to the response body describing the substitution:
//!
//! ```text
//! <!-- Origin server is changed from backend1.example to backend2.example by module -->
//! ```
//!
//! Requests without the trigger (or with a non-matching value) pass through completely
//! untouched. A declared `Content-Length` is adjusted to account for the trailer, responses
//! without a known length stay length-less and get the trailer at the true end of the stream.
//!
//! Two configuration settings are supported, to be supplied together:
//!
//! ```yaml
//! tap_trigger: secret
//! tap_upstream: backend2.example
//! ```
//!
//! Supplying only one of the two values is a configuration error and route setup fails. The
//! same settings are available as the `--tap-trigger` and `--tap-upstream` command line options.
//!
//! ## Code example
//!
//! ```rust
//! use filter_module_utils::{FromYaml, RequestFilter};
//! use origin_tap_module::OriginTapHandler;
//!
//! let conf = <OriginTapHandler as RequestFilter>::Conf::from_yaml(
//!     "tap_trigger: secret\ntap_upstream: backend2.example\n",
//! )
//! .unwrap();
//! let handler: OriginTapHandler = conf.try_into().unwrap();
//! ```
//!
//! The handler's `request_filter`, `response_filter` and `response_body_filter` phases then
//! need to be wired into the hosting server's pipeline for the respective route.

pub mod configuration;
mod handler;
mod signature;

pub use configuration::{OriginTapConf, OriginTapOpt};
pub use handler::{OriginTapCtx, OriginTapHandler};
