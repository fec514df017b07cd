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

use std::sync::Arc;

use crate::value::ValueReceive;

/// A single row of a result stream.
///
/// All records of one stream share the same `keys` (in server order).
#[derive(Debug, Clone)]
pub struct Record {
    pub keys: Arc<Vec<String>>,
    pub values: Vec<ValueReceive>,
}

impl Record {
    pub(crate) fn new(keys: Arc<Vec<String>>, values: Vec<ValueReceive>) -> Self {
        Self { keys, values }
    }

    /// The value under the given key, if any.
    pub fn value(&self, key: &str) -> Option<&ValueReceive> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
    }

    /// Moves the value under the given key out of the record, leaving
    /// [`ValueReceive::Null`] behind.
    pub fn take_value(&mut self, key: &str) -> Option<ValueReceive> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get_mut(i))
            .map(|v| std::mem::replace(v, ValueReceive::Null))
    }
}
