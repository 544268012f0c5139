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

//! Builds the signature trailer appended to rewritten response bodies.

use bytes::Bytes;

const PREFIX: &str = "\n<!-- Origin server is changed from ";
const JOINER: &str = " to ";
const SUFFIX: &str = " by module -->\n";

/// Formats the signature describing an origin substitution.
///
/// The returned buffer serves both as the emitted trailer and, via its length, as the
/// `Content-Length` adjustment, so the two can never disagree.
pub(crate) fn format(original_host: &str, new_host: &str) -> Bytes {
    let mut text = String::with_capacity(
        PREFIX.len() + original_host.len() + JOINER.len() + new_host.len() + SUFFIX.len(),
    );
    text.push_str(PREFIX);
    text.push_str(original_host);
    text.push_str(JOINER);
    text.push_str(new_host);
    text.push_str(SUFFIX);
    text.into()
}
