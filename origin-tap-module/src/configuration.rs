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

//! Structures required to deserialize Origin Tap Module configuration from YAML configuration
//! files.

use serde::Deserialize;
use structopt::StructOpt;

/// Command line options of the origin tap module
#[derive(Debug, Default, StructOpt)]
pub struct OriginTapOpt {
    /// Value the `tap` request header has to carry to activate the origin override
    #[structopt(long)]
    pub tap_trigger: Option<String>,

    /// Host to install as the upstream origin when the trigger matches
    #[structopt(long)]
    pub tap_upstream: Option<String>,
}

/// Configuration settings of the origin tap module
///
/// Both settings have to be supplied together, a handler cannot be created from a configuration
/// providing only one of them.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OriginTapConf {
    /// Value the `tap` request header has to carry to activate the origin override
    pub tap_trigger: Option<String>,

    /// Host to install as the upstream origin when the trigger matches
    pub tap_upstream: Option<String>,
}

impl OriginTapConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: OriginTapOpt) {
        if opt.tap_trigger.is_some() {
            self.tap_trigger = opt.tap_trigger;
        }
        if opt.tap_upstream.is_some() {
            self.tap_upstream = opt.tap_upstream;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use filter_module_utils::FromYaml;
    use test_log::test;

    #[test]
    fn merge_with_opt() {
        let mut conf = OriginTapConf::from_yaml("tap_trigger: secret\n").unwrap();
        assert_eq!(conf.tap_trigger.as_deref(), Some("secret"));
        assert_eq!(conf.tap_upstream, None);

        conf.merge_with_opt(OriginTapOpt {
            tap_trigger: None,
            tap_upstream: Some("backend2.example".to_owned()),
        });
        assert_eq!(conf.tap_trigger.as_deref(), Some("secret"));
        assert_eq!(conf.tap_upstream.as_deref(), Some("backend2.example"));

        conf.merge_with_opt(OriginTapOpt {
            tap_trigger: Some("other".to_owned()),
            tap_upstream: None,
        });
        assert_eq!(conf.tap_trigger.as_deref(), Some("other"));
        assert_eq!(conf.tap_upstream.as_deref(), Some("backend2.example"));
    }
}
