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

//! The session seam between filter modules and the hosting server.
//!
//! The hosting server owns the request lifecycle, upstream connections and the actual network
//! I/O. Filter modules only ever see it through [`SessionWrapper`]: request header access, the
//! per-request upstream host slot consulted during upstream selection, and the downstream sink
//! for response body chunks. [`TestSession`] is an in-memory implementation for tests.

use std::fmt::Display;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

use crate::error::Error;

/// Header of the downstream request.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    /// The request method
    pub method: Method,
    /// The request URI
    pub uri: Uri,
    /// The request headers
    pub headers: HeaderMap,
}

impl RequestHeader {
    /// Creates a new request header from a method name and a raw path.
    pub fn build(method: &str, path: &[u8]) -> Result<Self, Box<Error>> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|err| Error::http(format!("invalid method {method}: {err}")))?;
        let uri = Uri::try_from(path)
            .map_err(|err| Error::http(format!("invalid request path: {err}")))?;
        Ok(Self {
            method,
            uri,
            headers: HeaderMap::new(),
        })
    }

    /// Inserts a header, replacing any previous value stored under the same name.
    pub fn insert_header<N, V>(&mut self, name: N, value: V) -> Result<(), Box<Error>>
    where
        N: TryInto<HeaderName>,
        N::Error: Display,
        V: TryInto<HeaderValue>,
        V::Error: Display,
    {
        insert_into(&mut self.headers, name, value)
    }
}

/// Header of the response forwarded towards the client.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    /// The response status code
    pub status: StatusCode,
    /// The response headers
    pub headers: HeaderMap,
}

impl ResponseHeader {
    /// Creates a new response header with the given status code.
    pub fn build(status: u16) -> Result<Self, Box<Error>> {
        let status = StatusCode::from_u16(status)
            .map_err(|err| Error::http(format!("invalid status code {status}: {err}")))?;
        Ok(Self {
            status,
            headers: HeaderMap::new(),
        })
    }

    /// Inserts a header, replacing any previous value stored under the same name.
    pub fn insert_header<N, V>(&mut self, name: N, value: V) -> Result<(), Box<Error>>
    where
        N: TryInto<HeaderName>,
        N::Error: Display,
        V: TryInto<HeaderValue>,
        V::Error: Display,
    {
        insert_into(&mut self.headers, name, value)
    }

    /// The declared `Content-Length` if the response announces a known, finite length.
    ///
    /// `None` means the length is unknown, e.g. a streamed response.
    pub fn content_length(&self) -> Option<usize> {
        let value = self.headers.get(header::CONTENT_LENGTH)?;
        value.to_str().ok()?.trim().parse().ok()
    }

    /// Replaces the declared `Content-Length`.
    pub fn set_content_length(&mut self, length: usize) {
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
}

fn insert_into<N, V>(headers: &mut HeaderMap, name: N, value: V) -> Result<(), Box<Error>>
where
    N: TryInto<HeaderName>,
    N::Error: Display,
    V: TryInto<HeaderValue>,
    V::Error: Display,
{
    let name = name
        .try_into()
        .map_err(|err| Error::http(format!("invalid header name: {err}")))?;
    let value = value
        .try_into()
        .map_err(|err| Error::http(format!("invalid header value: {err}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Type used to store the upstream host in `SessionWrapper::extensions`
#[derive(Debug, Clone)]
struct UpstreamHost(String);

/// A trait implemented by wrappers around the hosting server's session
#[async_trait]
pub trait SessionWrapper: Send {
    /// Returns the request header.
    fn req_header(&self) -> &RequestHeader;

    /// Returns the request header, mutable.
    fn req_header_mut(&mut self) -> &mut RequestHeader;

    /// Returns a reference to the associated extensions.
    fn extensions(&self) -> &Extensions;

    /// Returns a mutable reference to the associated extensions.
    fn extensions_mut(&mut self) -> &mut Extensions;

    /// Current value of the per-request upstream host slot.
    ///
    /// The host's upstream selection reads this slot after the `request_filter` phase ran.
    fn upstream_host(&self) -> Option<&str> {
        self.extensions()
            .get::<UpstreamHost>()
            .map(|host| host.0.as_str())
    }

    /// Overwrites the upstream host for this request.
    fn set_upstream_host(&mut self, host: String) {
        self.extensions_mut().insert(UpstreamHost(host));
    }

    /// Forwards a response body chunk towards the client.
    ///
    /// `end_of_stream` marks the terminal chunk of the response, it can be `true` on at most one
    /// call per request.
    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>>;
}

/// In-memory session implementation for tests
#[derive(Debug)]
pub struct TestSession {
    header: RequestHeader,
    extensions: Extensions,
    written: Vec<(Option<Bytes>, bool)>,
    fail_next_write: bool,
}

impl From<RequestHeader> for TestSession {
    fn from(header: RequestHeader) -> Self {
        Self {
            header,
            extensions: Extensions::new(),
            written: Vec::new(),
            fail_next_write: false,
        }
    }
}

impl TestSession {
    /// The chunks forwarded via [`SessionWrapper::write_response_body`], in order, with their
    /// end-of-stream flags.
    pub fn written_chunks(&self) -> &[(Option<Bytes>, bool)] {
        &self.written
    }

    /// The forwarded response body with all chunks concatenated.
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (data, _) in &self.written {
            if let Some(data) = data {
                body.extend_from_slice(data);
            }
        }
        body
    }

    /// The forwarded response body as a string.
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    /// Makes the next [`SessionWrapper::write_response_body`] call fail, simulating a later
    /// pipeline stage rejecting the data.
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }
}

#[async_trait]
impl SessionWrapper for TestSession {
    fn req_header(&self) -> &RequestHeader {
        &self.header
    }

    fn req_header_mut(&mut self) -> &mut RequestHeader {
        &mut self.header
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(Error::downstream("simulated write failure"));
        }
        self.written.push((data, end_of_stream));
        Ok(())
    }
}
