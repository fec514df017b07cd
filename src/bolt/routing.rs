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

use log::warn;

use crate::error_::{BoltError, Result};
use crate::value::ValueReceive;

/// The cluster view returned by a `ROUTE` request, for a routing driver to
/// act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    /// Seconds the table may be cached.
    pub ttl: i64,
    /// The database the table applies to, when the server resolved one.
    pub database: Option<String>,
    pub routers: Vec<String>,
    pub readers: Vec<String>,
    pub writers: Vec<String>,
}

impl RoutingTable {
    pub(crate) fn from_meta(mut meta: super::BoltMeta) -> Result<Self> {
        let rt = meta
            .remove("rt")
            .ok_or_else(|| protocol_error("ROUTE response is missing the rt entry"))?;
        let mut rt = rt
            .try_into_map()
            .map_err(|v| protocol_error(format!("ROUTE rt was not a map: {v:?}")))?;
        let ttl = rt
            .remove("ttl")
            .and_then(|v| v.try_into_int().ok())
            .ok_or_else(|| protocol_error("ROUTE rt.ttl missing or not an integer"))?;
        let database = match rt.remove("db") {
            None | Some(ValueReceive::Null) => None,
            Some(v) => Some(
                v.try_into_string()
                    .map_err(|v| protocol_error(format!("ROUTE rt.db was not a string: {v:?}")))?,
            ),
        };
        let servers = rt
            .remove("servers")
            .and_then(|v| v.try_into_list().ok())
            .ok_or_else(|| protocol_error("ROUTE rt.servers missing or not a list"))?;

        let mut table = Self {
            ttl,
            database,
            ..Default::default()
        };
        for server in servers {
            let mut server = server.try_into_map().map_err(|v| {
                protocol_error(format!("ROUTE rt.servers entry was not a map: {v:?}"))
            })?;
            let role = server
                .remove("role")
                .and_then(|v| v.try_into_string().ok())
                .ok_or_else(|| protocol_error("ROUTE server entry is missing its role"))?;
            let addresses = server
                .remove("addresses")
                .and_then(|v| v.try_into_list().ok())
                .ok_or_else(|| protocol_error("ROUTE server entry is missing its addresses"))?
                .into_iter()
                .map(|v| {
                    v.try_into_string().map_err(|v| {
                        protocol_error(format!("ROUTE server address was not a string: {v:?}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            match role.as_str() {
                "ROUTE" => table.routers = addresses,
                "READ" => table.readers = addresses,
                "WRITE" => table.writers = addresses,
                role => warn!("ignoring unknown server role {role:?} in routing table"),
            }
        }
        Ok(table)
    }
}

fn protocol_error(message: impl Into<String>) -> BoltError {
    BoltError::protocol_error(message)
}
