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

//! Handler for the request, response header and response body filter phases.

use async_trait::async_trait;
use bytes::Bytes;
use filter_module_utils::session::{ResponseHeader, SessionWrapper};
use filter_module_utils::{Error, RequestFilter, RequestFilterResult};
use http::HeaderName;
use log::{debug, trace};

use crate::configuration::OriginTapConf;
use crate::signature;

const TAP_HEADER: HeaderName = HeaderName::from_static("tap");

#[derive(Debug, Clone, PartialEq, Eq)]
struct TapTarget {
    trigger: String,
    upstream: String,
}

/// Handler for the origin tap filter phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginTapHandler {
    target: Option<TapTarget>,
}

impl TryFrom<OriginTapConf> for OriginTapHandler {
    type Error = Box<Error>;

    fn try_from(conf: OriginTapConf) -> Result<Self, Self::Error> {
        debug!("Origin tap configuration received: {conf:#?}");

        let target = match (conf.tap_trigger, conf.tap_upstream) {
            (Some(trigger), Some(upstream)) => Some(TapTarget { trigger, upstream }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::configuration(
                    "tap_trigger requires tap_upstream to be set as well",
                ))
            }
            (None, Some(_)) => {
                return Err(Error::configuration(
                    "tap_upstream requires tap_trigger to be set as well",
                ))
            }
        };

        Ok(Self { target })
    }
}

/// Per-request state of the origin tap handler
#[derive(Debug, Default)]
pub struct OriginTapCtx {
    active: bool,
    original_host: String,
    new_host: String,
    signature_emitted: bool,
    signature: Option<Bytes>,
}

impl OriginTapCtx {
    /// Returns the signature trailer for this request, formatting it on first use. Once
    /// computed, the buffer never changes for the life of the request.
    fn signature(&mut self) -> Bytes {
        self.signature
            .get_or_insert_with(|| signature::format(&self.original_host, &self.new_host))
            .clone()
    }
}

#[async_trait]
impl RequestFilter for OriginTapHandler {
    type Conf = OriginTapConf;

    type CTX = OriginTapCtx;

    fn new_ctx() -> Self::CTX {
        OriginTapCtx::default()
    }

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let Some(target) = &self.target else {
            return Ok(RequestFilterResult::Unhandled);
        };

        // The header name compares case-insensitively, the value has to match byte for byte.
        let matched = session
            .req_header()
            .headers
            .get(&TAP_HEADER)
            .is_some_and(|value| value.as_bytes() == target.trigger.as_bytes());
        if !matched {
            return Ok(RequestFilterResult::Unhandled);
        }

        // An unset slot is captured as the empty string.
        let original_host = session.upstream_host().unwrap_or_default().to_owned();
        debug!(
            "tap trigger matched, changing upstream host from {original_host:?} to {:?}",
            target.upstream
        );
        session.set_upstream_host(target.upstream.clone());

        ctx.active = true;
        ctx.original_host = original_host;
        ctx.new_host = target.upstream.clone();

        // The override is a side effect only, the request still goes through the remaining
        // filters and upstream dispatch as usual.
        Ok(RequestFilterResult::Unhandled)
    }

    fn response_filter(
        &self,
        _session: &mut impl SessionWrapper,
        response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) {
        if !ctx.active {
            return;
        }

        let signature_len = ctx.signature().len();
        if let Some(content_length) = response.content_length() {
            response.set_content_length(content_length + signature_len);
            trace!(
                "adjusted Content-Length from {content_length} to {}",
                content_length + signature_len
            );
        }
    }

    async fn response_body_filter(
        &self,
        session: &mut impl SessionWrapper,
        data: Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<(), Box<Error>> {
        if !ctx.active || ctx.signature_emitted || !end_of_stream {
            return session.write_response_body(data, end_of_stream).await;
        }

        // The original final chunk goes out first, no longer marked as the end of the stream.
        // A downstream failure propagates before the emitted flag is set.
        if data.is_some() {
            session.write_response_body(data, false).await?;
        }
        session
            .write_response_body(Some(ctx.signature()), true)
            .await?;
        ctx.signature_emitted = true;
        trace!("appended signature trailer for {}", ctx.new_host);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use filter_module_utils::session::{RequestHeader, TestSession};
    use filter_module_utils::FromYaml;
    use http::header;
    use test_log::test;

    const SIGNATURE: &str = "\n<!-- Origin server is changed from backend1.example to \
                             backend2.example by module -->\n";

    fn make_handler(conf: &str) -> OriginTapHandler {
        <OriginTapHandler as RequestFilter>::Conf::from_yaml(conf)
            .unwrap()
            .try_into()
            .unwrap()
    }

    fn make_session(headers: &[(&str, &str)]) -> TestSession {
        let mut header = RequestHeader::build("GET", b"/").unwrap();
        for (name, value) in headers {
            header.insert_header(*name, *value).unwrap();
        }
        let mut session = TestSession::from(header);
        session.set_upstream_host("backend1.example".to_owned());
        session
    }

    fn make_response(content_length: Option<usize>) -> ResponseHeader {
        let mut response = ResponseHeader::build(200).unwrap();
        response.insert_header("X-Test", "unchanged").unwrap();
        if let Some(content_length) = content_length {
            response.set_content_length(content_length);
        }
        response
    }

    async fn send_body(
        handler: &OriginTapHandler,
        session: &mut TestSession,
        ctx: &mut OriginTapCtx,
        chunks: &[&str],
    ) -> Result<(), Box<Error>> {
        let last = chunks.len().saturating_sub(1);
        for (index, chunk) in chunks.iter().enumerate() {
            handler
                .response_body_filter(
                    session,
                    Some(Bytes::copy_from_slice(chunk.as_bytes())),
                    index == last,
                    ctx,
                )
                .await?;
        }
        Ok(())
    }

    #[test(tokio::test)]
    async fn no_trigger_header() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[]);
        let mut ctx = OriginTapHandler::new_ctx();
        assert!(!handler.handle(&mut session, &mut ctx).await?);
        assert_eq!(session.upstream_host(), Some("backend1.example"));

        let mut response = make_response(Some(5));
        handler.response_filter(&mut session, &mut response, &mut ctx);
        assert_eq!(response.content_length(), Some(5));

        send_body(&handler, &mut session, &mut ctx, &["hello"]).await?;
        assert_eq!(
            session.written_chunks(),
            [(Some(Bytes::from_static(b"hello")), true)]
        );
        assert!(!ctx.signature_emitted);

        Ok(())
    }

    #[test(tokio::test)]
    async fn mismatched_trigger_value() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "wrong")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;
        assert_eq!(session.upstream_host(), Some("backend1.example"));
        assert!(!ctx.active);

        // The value comparison is case-sensitive.
        let mut session = make_session(&[("tap", "SECRET")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;
        assert_eq!(session.upstream_host(), Some("backend1.example"));
        assert!(!ctx.active);

        Ok(())
    }

    #[test(tokio::test)]
    async fn unconfigured() -> Result<(), Box<Error>> {
        let handler = make_handler("{}");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        assert_eq!(
            handler.request_filter(&mut session, &mut ctx).await?,
            RequestFilterResult::Unhandled
        );
        assert_eq!(session.upstream_host(), Some("backend1.example"));
        assert!(!ctx.active);

        Ok(())
    }

    #[test]
    fn partial_configuration() {
        let conf =
            <OriginTapHandler as RequestFilter>::Conf::from_yaml("tap_trigger: secret").unwrap();
        let err = OriginTapHandler::try_from(conf).unwrap_err();
        assert!(matches!(*err, Error::Configuration(_)));

        let conf = <OriginTapHandler as RequestFilter>::Conf::from_yaml(
            "tap_upstream: backend2.example",
        )
        .unwrap();
        let err = OriginTapHandler::try_from(conf).unwrap_err();
        assert!(matches!(*err, Error::Configuration(_)));
    }

    #[test(tokio::test)]
    async fn override_and_append() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        assert_eq!(
            handler.request_filter(&mut session, &mut ctx).await?,
            RequestFilterResult::Unhandled
        );
        assert_eq!(session.upstream_host(), Some("backend2.example"));
        assert!(ctx.active);

        let mut response = make_response(Some(5));
        handler.response_filter(&mut session, &mut response, &mut ctx);
        assert_eq!(response.content_length(), Some(5 + SIGNATURE.len()));
        assert_eq!(
            response.headers.get("X-Test").unwrap(),
            "unchanged",
            "unrelated headers stay untouched"
        );

        send_body(&handler, &mut session, &mut ctx, &["hello"]).await?;
        assert_eq!(session.body_str(), format!("hello{SIGNATURE}"));
        assert_eq!(
            session.written_chunks(),
            [
                (Some(Bytes::from_static(b"hello")), false),
                (Some(Bytes::from(SIGNATURE)), true),
            ]
        );
        assert!(ctx.signature_emitted);

        Ok(())
    }

    #[test(tokio::test)]
    async fn trigger_header_name_case_insensitive() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[]);
        session
            .req_header_mut()
            .insert_header("TAP", "secret")
            .unwrap();
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;
        assert_eq!(session.upstream_host(), Some("backend2.example"));
        assert!(ctx.active);

        Ok(())
    }

    #[test(tokio::test)]
    async fn unknown_content_length() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;

        let mut response = make_response(None);
        handler.response_filter(&mut session, &mut response, &mut ctx);
        assert_eq!(
            response.content_length(),
            None,
            "unknown length must not be invented"
        );
        assert!(!response.headers.contains_key(header::CONTENT_LENGTH));

        send_body(&handler, &mut session, &mut ctx, &["streamed"]).await?;
        assert_eq!(session.body_str(), format!("streamed{SIGNATURE}"));

        Ok(())
    }

    #[test(tokio::test)]
    async fn multi_chunk_body() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;

        send_body(&handler, &mut session, &mut ctx, &["first ", "second ", "third"]).await?;
        assert_eq!(session.body_str(), format!("first second third{SIGNATURE}"));

        // Exactly one forwarded chunk carries the end-of-stream flag and it is the signature.
        let terminal: Vec<_> = session
            .written_chunks()
            .iter()
            .filter(|(_, end_of_stream)| *end_of_stream)
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].0.as_ref().unwrap(), SIGNATURE);
        assert!(session.written_chunks().last().unwrap().1);

        Ok(())
    }

    #[test(tokio::test)]
    async fn empty_final_chunk() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;

        handler
            .response_body_filter(&mut session, Some(Bytes::from_static(b"data")), false, &mut ctx)
            .await?;
        handler
            .response_body_filter(&mut session, None, true, &mut ctx)
            .await?;

        assert_eq!(session.body_str(), format!("data{SIGNATURE}"));
        assert_eq!(
            session.written_chunks(),
            [
                (Some(Bytes::from_static(b"data")), false),
                (Some(Bytes::from(SIGNATURE)), true),
            ]
        );

        Ok(())
    }

    #[test(tokio::test)]
    async fn idempotent_after_signature() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;

        send_body(&handler, &mut session, &mut ctx, &["hello"]).await?;
        let chunks_before = session.written_chunks().len();

        // Residual chunks after the signature pass through unchanged, no duplicate signature.
        handler
            .response_body_filter(&mut session, Some(Bytes::from_static(b"late")), true, &mut ctx)
            .await?;
        assert_eq!(session.written_chunks().len(), chunks_before + 1);
        assert_eq!(
            session.written_chunks().last().unwrap(),
            &(Some(Bytes::from_static(b"late")), true)
        );
        assert_eq!(
            session.body_str().matches(SIGNATURE).count(),
            1,
            "signature appears exactly once"
        );

        Ok(())
    }

    #[test(tokio::test)]
    async fn downstream_failure() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut session = make_session(&[("tap", "secret")]);
        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;

        session.fail_next_write();
        let err = handler
            .response_body_filter(&mut session, Some(Bytes::from_static(b"hello")), true, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(*err, Error::Downstream(_)));
        assert!(!ctx.signature_emitted);
        assert!(session.written_chunks().is_empty());

        Ok(())
    }

    #[test(tokio::test)]
    async fn unset_upstream_host() -> Result<(), Box<Error>> {
        let handler = make_handler("tap_trigger: secret\ntap_upstream: backend2.example");

        let mut header = RequestHeader::build("GET", b"/").unwrap();
        header.insert_header("tap", "secret").unwrap();
        let mut session = TestSession::from(header);

        let mut ctx = OriginTapHandler::new_ctx();
        handler.request_filter(&mut session, &mut ctx).await?;
        assert_eq!(session.upstream_host(), Some("backend2.example"));

        send_body(&handler, &mut session, &mut ctx, &["hello"]).await?;
        assert_eq!(
            session.body_str(),
            "hello\n<!-- Origin server is changed from  to backend2.example by module -->\n"
        );

        Ok(())
    }
}
