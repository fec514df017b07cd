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

//! The summary a stream terminates with.

use std::collections::HashMap;

use log::warn;

use crate::bolt::{BoltMeta, ProtocolVersion};
use crate::value::ValueReceive;

/// Metadata the server attached to the end of a result stream, enriched
/// with what the connection knows about the server it came from.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct Summary {
    /// Causal token of the committing transaction, if this summary ended
    /// an auto-commit query that applied a write.
    pub bookmark: Option<String>,
    pub query_type: Option<QueryType>,
    /// The database the query ran against, as resolved by the server.
    pub database: Option<String>,
    pub counters: Counters,
    pub notifications: Vec<Notification>,
    pub plan: Option<Plan>,
    pub profile: Option<Profile>,
    /// Milliseconds until the first record was available.
    pub result_available_after: Option<i64>,
    /// Milliseconds until the last record was consumed.
    pub result_consumed_after: Option<i64>,
    pub server_agent: String,
    pub server_name: String,
    pub protocol_version: ProtocolVersion,
}

impl Summary {
    pub(crate) fn parse(mut meta: BoltMeta) -> Self {
        let bookmark = remove_string(&mut meta, "bookmark");
        let query_type = remove_string(&mut meta, "type")
            .as_deref()
            .and_then(QueryType::from_protocol_str);
        let database = remove_string(&mut meta, "db");
        let counters = meta
            .remove("stats")
            .and_then(|v| v.try_into_map().ok())
            .map(Counters::parse)
            .unwrap_or_default();
        let notifications = meta
            .remove("notifications")
            .and_then(|v| v.try_into_list().ok())
            .map(|list| {
                list.into_iter()
                    .filter_map(|v| v.try_into_map().ok().map(Notification::parse))
                    .collect()
            })
            .unwrap_or_default();
        let plan = meta
            .remove("plan")
            .and_then(|v| v.try_into_map().ok())
            .map(Plan::parse);
        let profile = meta
            .remove("profile")
            .and_then(|v| v.try_into_map().ok())
            .map(Profile::parse);
        let result_consumed_after = remove_int(&mut meta, "t_last");
        Self {
            bookmark,
            query_type,
            database,
            counters,
            notifications,
            plan,
            profile,
            result_available_after: None,
            result_consumed_after,
            ..Default::default()
        }
    }
}

/// What kind of statement the server classified the query as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueryType {
    Read,
    Write,
    ReadWrite,
    Schema,
}

impl QueryType {
    fn from_protocol_str(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Self::Read),
            "w" => Some(Self::Write),
            "rw" => Some(Self::ReadWrite),
            "s" => Some(Self::Schema),
            s => {
                warn!("server sent unknown query type {s:?}");
                None
            }
        }
    }
}

/// The write counters of a query (`stats` entry of the terminating
/// success).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
    pub contains_updates: bool,
    pub contains_system_updates: bool,
}

impl Counters {
    fn parse(mut meta: BoltMeta) -> Self {
        let mut counters = Self {
            nodes_created: remove_int(&mut meta, "nodes-created").unwrap_or_default(),
            nodes_deleted: remove_int(&mut meta, "nodes-deleted").unwrap_or_default(),
            relationships_created: remove_int(&mut meta, "relationships-created")
                .unwrap_or_default(),
            relationships_deleted: remove_int(&mut meta, "relationships-deleted")
                .unwrap_or_default(),
            properties_set: remove_int(&mut meta, "properties-set").unwrap_or_default(),
            labels_added: remove_int(&mut meta, "labels-added").unwrap_or_default(),
            labels_removed: remove_int(&mut meta, "labels-removed").unwrap_or_default(),
            indexes_added: remove_int(&mut meta, "indexes-added").unwrap_or_default(),
            indexes_removed: remove_int(&mut meta, "indexes-removed").unwrap_or_default(),
            constraints_added: remove_int(&mut meta, "constraints-added").unwrap_or_default(),
            constraints_removed: remove_int(&mut meta, "constraints-removed").unwrap_or_default(),
            system_updates: remove_int(&mut meta, "system-updates").unwrap_or_default(),
            contains_updates: false,
            contains_system_updates: false,
        };
        counters.contains_system_updates = meta
            .remove("contains-system-updates")
            .and_then(|v| v.try_into_bool().ok())
            .unwrap_or(counters.system_updates > 0);
        counters.contains_updates = meta
            .remove("contains-updates")
            .and_then(|v| v.try_into_bool().ok())
            .unwrap_or_else(|| {
                counters.nodes_created > 0
                    || counters.nodes_deleted > 0
                    || counters.relationships_created > 0
                    || counters.relationships_deleted > 0
                    || counters.properties_set > 0
                    || counters.labels_added > 0
                    || counters.labels_removed > 0
                    || counters.indexes_added > 0
                    || counters.indexes_removed > 0
                    || counters.constraints_added > 0
                    || counters.constraints_removed > 0
            });
        counters
    }
}

/// A hint or warning the server attached to the result.
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct Notification {
    pub code: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub position: Option<Position>,
}

/// Where in the query text a [`Notification`] points.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub offset: i64,
    pub line: i64,
    pub column: i64,
}

impl Notification {
    fn parse(mut meta: BoltMeta) -> Self {
        let position = meta
            .remove("position")
            .and_then(|v| v.try_into_map().ok())
            .map(|mut position| Position {
                offset: remove_int(&mut position, "offset").unwrap_or_default(),
                line: remove_int(&mut position, "line").unwrap_or_default(),
                column: remove_int(&mut position, "column").unwrap_or_default(),
            });
        Self {
            code: remove_string(&mut meta, "code"),
            title: remove_string(&mut meta, "title"),
            description: remove_string(&mut meta, "description"),
            severity: remove_string(&mut meta, "severity"),
            category: remove_string(&mut meta, "category"),
            position,
        }
    }
}

/// The query plan, present when the query was `EXPLAIN`ed.
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct Plan {
    pub op_type: String,
    pub args: HashMap<String, ValueReceive>,
    pub identifiers: Vec<String>,
    pub children: Vec<Plan>,
}

impl Plan {
    fn parse(mut meta: BoltMeta) -> Self {
        Self {
            op_type: remove_string(&mut meta, "operatorType").unwrap_or_default(),
            args: meta
                .remove("args")
                .and_then(|v| v.try_into_map().ok())
                .unwrap_or_default(),
            identifiers: remove_string_list(&mut meta, "identifiers"),
            children: meta
                .remove("children")
                .and_then(|v| v.try_into_list().ok())
                .map(|children| {
                    children
                        .into_iter()
                        .filter_map(|v| v.try_into_map().ok().map(Plan::parse))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// The executed plan with per-operator cost, present when the query was
/// `PROFILE`d.
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct Profile {
    pub op_type: String,
    pub args: HashMap<String, ValueReceive>,
    pub identifiers: Vec<String>,
    pub db_hits: i64,
    pub rows: i64,
    pub children: Vec<Profile>,
}

impl Profile {
    fn parse(mut meta: BoltMeta) -> Self {
        Self {
            op_type: remove_string(&mut meta, "operatorType").unwrap_or_default(),
            args: meta
                .remove("args")
                .and_then(|v| v.try_into_map().ok())
                .unwrap_or_default(),
            identifiers: remove_string_list(&mut meta, "identifiers"),
            db_hits: remove_int(&mut meta, "dbHits").unwrap_or_default(),
            rows: remove_int(&mut meta, "rows").unwrap_or_default(),
            children: meta
                .remove("children")
                .and_then(|v| v.try_into_list().ok())
                .map(|children| {
                    children
                        .into_iter()
                        .filter_map(|v| v.try_into_map().ok().map(Profile::parse))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn remove_string(meta: &mut BoltMeta, key: &str) -> Option<String> {
    meta.remove(key).and_then(|v| v.try_into_string().ok())
}

fn remove_int(meta: &mut BoltMeta, key: &str) -> Option<i64> {
    meta.remove(key).and_then(|v| v.try_into_int().ok())
}

fn remove_string_list(meta: &mut BoltMeta, key: &str) -> Vec<String> {
    meta.remove(key)
        .and_then(|v| v.try_into_list().ok())
        .map(|list| {
            list.into_iter()
                .filter_map(|v| v.try_into_string().ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::value;
    use crate::value::ValueSend;

    fn parse(meta: ValueSend) -> Summary {
        let ValueReceive::Map(meta) = ValueReceive::from(meta) else {
            panic!("test meta must be a map");
        };
        Summary::parse(meta)
    }

    #[rstest]
    fn test_parse_full_meta() {
        let summary = parse(value!({
            "bookmark": "bm:42",
            "type": "rw",
            "db": "neo4j",
            "t_last": 7,
            "stats": {"nodes-created": 2, "properties-set": 3},
            "notifications": [{
                "code": "Neo.ClientNotification.Statement.CartesianProduct",
                "title": "t",
                "description": "d",
                "severity": "WARNING",
                "position": {"offset": 0, "line": 1, "column": 1}
            }]
        }));
        assert_eq!(summary.bookmark.as_deref(), Some("bm:42"));
        assert_eq!(summary.query_type, Some(QueryType::ReadWrite));
        assert_eq!(summary.database.as_deref(), Some("neo4j"));
        assert_eq!(summary.result_consumed_after, Some(7));
        assert_eq!(summary.counters.nodes_created, 2);
        assert_eq!(summary.counters.properties_set, 3);
        assert!(summary.counters.contains_updates);
        assert!(!summary.counters.contains_system_updates);
        assert_eq!(summary.notifications.len(), 1);
        assert_eq!(
            summary.notifications[0].severity.as_deref(),
            Some("WARNING")
        );
        assert_eq!(
            summary.notifications[0].position,
            Some(Position {
                offset: 0,
                line: 1,
                column: 1
            })
        );
    }

    #[rstest]
    fn test_parse_empty_meta() {
        let summary = parse(value!({}));
        assert_eq!(summary.bookmark, None);
        assert_eq!(summary.query_type, None);
        assert_eq!(summary.counters, Counters::default());
        assert!(summary.notifications.is_empty());
        assert!(summary.plan.is_none());
    }

    #[rstest]
    fn test_parse_plan_tree() {
        let summary = parse(value!({
            "plan": {
                "operatorType": "ProduceResults",
                "identifiers": ["x"],
                "args": {},
                "children": [{"operatorType": "Projection", "children": []}]
            }
        }));
        let plan = summary.plan.unwrap();
        assert_eq!(plan.op_type, "ProduceResults");
        assert_eq!(plan.identifiers, vec!["x"]);
        assert_eq!(plan.children.len(), 1);
        assert_eq!(plan.children[0].op_type, "Projection");
    }

    #[rstest]
    #[case("r", Some(QueryType::Read))]
    #[case("w", Some(QueryType::Write))]
    #[case("rw", Some(QueryType::ReadWrite))]
    #[case("s", Some(QueryType::Schema))]
    #[case("??", None)]
    fn test_query_type(#[case] input: &str, #[case] expected: Option<QueryType>) {
        assert_eq!(QueryType::from_protocol_str(input), expected);
    }
}
