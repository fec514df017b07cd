// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use crate::value::ValueSend;

/// Controls which notifications the server should emit for a query or
/// transaction. Only supported by protocol 5.2 and later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub minimum_severity: Option<MinimumSeverity>,
    pub disabled_categories: Option<Vec<String>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MinimumSeverity {
    Off,
    Warning,
    Information,
}

impl MinimumSeverity {
    fn as_protocol_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Warning => "WARNING",
            Self::Information => "INFORMATION",
        }
    }
}

impl NotificationFilter {
    pub(crate) fn is_default(&self) -> bool {
        self.minimum_severity.is_none() && self.disabled_categories.is_none()
    }

    pub(crate) fn write_to_meta(&self, meta: &mut HashMap<String, ValueSend>) {
        if let Some(minimum_severity) = &self.minimum_severity {
            meta.insert(
                "notifications_minimum_severity".into(),
                minimum_severity.as_protocol_str().into(),
            );
        }
        if let Some(disabled_categories) = &self.disabled_categories {
            meta.insert(
                "notifications_disabled_categories".into(),
                ValueSend::List(
                    disabled_categories
                        .iter()
                        .map(|c| c.as_str().into())
                        .collect(),
                ),
            );
        }
    }
}
