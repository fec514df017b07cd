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

//! Graph entities as returned by the server.

use std::collections::HashMap;

use super::ValueReceive;

/// A node in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
}

/// A relationship between two [`Node`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub type_: String,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
    pub start_node_element_id: String,
    pub end_node_element_id: String,
}

/// A relationship without its endpoints, as found inside a [`Path`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub type_: String,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
}

/// An alternating sequence of nodes and relationships.
///
/// `indices` is the server's compressed traversal encoding: relationship
/// indices are 1-based and signed (negative when traversed in reverse),
/// node indices are 0-based into `nodes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    pub indices: Vec<isize>,
}
