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

//! Values that can be sent to and received from the server.
//!
//! Outbound values ([`ValueSend`]) cover what the packer can encode;
//! inbound values ([`ValueReceive`]) additionally cover the graph types
//! (nodes, relationships, paths) the server may return.

pub mod graph;
pub mod spatial;
pub mod time;

mod value_receive;
mod value_send;

pub use value_receive::{BrokenValue, ValueReceive};
pub use value_send::ValueSend;

pub(crate) use value_receive::BrokenValueInner;
