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

// heavily inspired by [serde_json]'s `json!` macro
// [serde_json]: https://github.com/serde-rs/json

#[cfg(test)]
macro_rules! hash_map {
    () => {std::collections::HashMap::new()};
    ( $($key:expr => $value:expr),* $(,)? ) => {
        {
            let mut m = std::collections::HashMap::new();
            $(
                m.insert($key, $value);
            )*
            m
        }
    };
}

#[cfg(test)]
pub(crate) use hash_map;

/// Short notation for creating a [`ValueSend`].
///
/// # Examples
/// ```
/// use neo4j_bolt::{value, ValueSend};
///
/// assert_eq!(ValueSend::Null, value!(null));
/// assert_eq!(ValueSend::Boolean(true), value!(true));
/// assert_eq!(ValueSend::Integer(1), value!(1));
/// assert_eq!(ValueSend::Float(1.5), value!(1.5));
/// assert_eq!(ValueSend::String(String::from("foo")), value!("foo"));
/// assert_eq!(
///     ValueSend::List(vec![ValueSend::Integer(1), ValueSend::Null]),
///     value!([1, null])
/// );
/// ```
///
/// [`ValueSend`]: crate::ValueSend
#[macro_export]
macro_rules! value {
    (null) => {
        $crate::ValueSend::Null
    };
    ([ $($value:tt),* $(,)? ]) => {
        $crate::ValueSend::List(vec![ $($crate::value!($value)),* ])
    };
    ({ $($key:literal: $value:tt),* $(,)? }) => {
        $crate::ValueSend::Map($crate::value_map!({ $($key: $value),* }))
    };
    ($value:expr) => {
        $crate::ValueSend::from($value)
    };
}

/// Short notation for creating a [`HashMap`](std::collections::HashMap) of
/// [`ValueSend`]s as accepted by query parameters and transaction metadata.
///
/// # Examples
/// ```
/// use neo4j_bolt::{value_map, ValueSend};
///
/// let map = value_map!({"x": 1, "y": null});
/// assert_eq!(map.get("x"), Some(&ValueSend::Integer(1)));
/// assert_eq!(map.get("y"), Some(&ValueSend::Null));
/// ```
///
/// [`ValueSend`]: crate::ValueSend
#[macro_export]
macro_rules! value_map {
    ({ $($key:literal: $value:tt),* $(,)? }) => {
        {
            #[allow(unused_mut)]
            let mut m = std::collections::HashMap::new();
            $(
                m.insert(String::from($key), $crate::value!($value));
            )*
            m
        }
    };
}
