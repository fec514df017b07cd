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

/// The credentials sent during the handshake (`LOGON`, or merged into
/// `HELLO` for protocol 5.0).
///
/// The `"credentials"` entry is redacted in all log output.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub(crate) data: HashMap<String, ValueSend>,
}

impl AuthToken {
    /// No authentication (server with auth disabled).
    pub fn new_none_auth() -> Self {
        let mut data = HashMap::with_capacity(1);
        data.insert("scheme".into(), "none".into());
        Self { data }
    }

    /// Username/password authentication.
    pub fn new_basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut data = HashMap::with_capacity(3);
        data.insert("scheme".into(), "basic".into());
        data.insert("principal".into(), username.into().into());
        data.insert("credentials".into(), password.into().into());
        Self { data }
    }

    /// Like [`AuthToken::new_basic_auth`], but the realm is sent along.
    pub fn new_basic_auth_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        let mut token = Self::new_basic_auth(username, password);
        token.data.insert("realm".into(), realm.into().into());
        token
    }

    /// Kerberos authentication with a base64 encoded ticket.
    pub fn new_kerberos_auth(base64_encoded_ticket: impl Into<String>) -> Self {
        let mut data = HashMap::with_capacity(3);
        data.insert("scheme".into(), "kerberos".into());
        data.insert("principal".into(), "".into());
        data.insert("credentials".into(), base64_encoded_ticket.into().into());
        Self { data }
    }

    /// Bearer token authentication (e.g., SSO).
    pub fn new_bearer_auth(base64_encoded_token: impl Into<String>) -> Self {
        let mut data = HashMap::with_capacity(2);
        data.insert("scheme".into(), "bearer".into());
        data.insert("credentials".into(), base64_encoded_token.into().into());
        Self { data }
    }

    /// Arbitrary scheme for custom server-side authentication plugins.
    pub fn new_custom_auth(
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        scheme: Option<String>,
        parameters: Option<HashMap<String, ValueSend>>,
    ) -> Self {
        let mut data = HashMap::with_capacity(
            2 + usize::from(realm.is_some()) + usize::from(parameters.is_some()),
        );
        if let Some(principal) = principal {
            data.insert("principal".into(), principal.into());
        }
        if let Some(credentials) = credentials {
            data.insert("credentials".into(), credentials.into());
        }
        if let Some(realm) = realm {
            data.insert("realm".into(), realm.into());
        }
        if let Some(scheme) = scheme {
            data.insert("scheme".into(), scheme.into());
        }
        if let Some(parameters) = parameters {
            data.insert("parameters".into(), ValueSend::Map(parameters));
        }
        Self { data }
    }

    pub fn data(&self) -> &HashMap<String, ValueSend> {
        &self.data
    }
}
