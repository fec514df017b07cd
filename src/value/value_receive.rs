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

use std::collections::{HashMap, VecDeque};
use std::fmt::Write;

use itertools::Itertools;

use super::graph;
use super::spatial;
use super::time;
use super::ValueSend;

/// A value as received from the server.
///
/// Covers everything a [`ValueSend`] can express plus the graph entities
/// the server may hand back in records.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueReceive {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<ValueReceive>),
    Map(HashMap<String, ValueReceive>),
    Cartesian2D(spatial::Cartesian2D),
    Cartesian3D(spatial::Cartesian3D),
    WGS84_2D(spatial::WGS84_2D),
    WGS84_3D(spatial::WGS84_3D),
    Date(time::Date),
    Time(time::Time),
    LocalTime(time::LocalTime),
    DateTime(time::DateTime),
    DateTimeZoneId(time::DateTimeZoneId),
    LocalDateTime(time::LocalDateTime),
    Duration(time::Duration),
    Node(graph::Node),
    Relationship(graph::Relationship),
    Path(graph::Path),
    /// A value the server sent that could not be hydrated: an unknown
    /// structure (e.g., from a newer server) or a malformed known one.
    /// Receiving it doesn't kill the connection; using it is up to the
    /// caller.
    BrokenValue(BrokenValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokenValue {
    pub(crate) inner: BrokenValueInner,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BrokenValueInner {
    Reason(String),
    UnknownStruct {
        tag: u8,
        fields: VecDeque<ValueReceive>,
    },
}

impl BrokenValue {
    pub fn reason(&self) -> String {
        match &self.inner {
            BrokenValueInner::Reason(reason) => reason.clone(),
            BrokenValueInner::UnknownStruct { tag, .. } => {
                format!("received an unknown structure with tag {tag:02X?}")
            }
        }
    }
}

impl From<BrokenValueInner> for ValueReceive {
    fn from(inner: BrokenValueInner) -> Self {
        ValueReceive::BrokenValue(BrokenValue { inner })
    }
}

impl ValueReceive {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&String> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_map(&self) -> Option<&HashMap<String, ValueReceive>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn try_into_bool(self) -> Result<bool, Self> {
        match self {
            Self::Boolean(v) => Ok(v),
            _ => Err(self),
        }
    }

    #[inline]
    pub fn try_into_int(self) -> Result<i64, Self> {
        match self {
            Self::Integer(v) => Ok(v),
            _ => Err(self),
        }
    }

    #[inline]
    pub fn try_into_string(self) -> Result<String, Self> {
        match self {
            Self::String(v) => Ok(v),
            _ => Err(self),
        }
    }

    #[inline]
    pub fn try_into_list(self) -> Result<Vec<ValueReceive>, Self> {
        match self {
            Self::List(v) => Ok(v),
            _ => Err(self),
        }
    }

    #[inline]
    pub fn try_into_map(self) -> Result<HashMap<String, ValueReceive>, Self> {
        match self {
            Self::Map(v) => Ok(v),
            _ => Err(self),
        }
    }

    /// Compact single-line rendering for debug logs.
    pub(crate) fn dbg_print(&self) -> String {
        match self {
            Self::Null => String::from("null"),
            Self::Boolean(v) => format!("{v}"),
            Self::Integer(v) => format!("{v}"),
            Self::Float(v) => format!("{v}"),
            Self::Bytes(v) => format!("bytes{v:02X?}"),
            Self::String(v) => format!("{v:?}"),
            Self::List(v) => format!("[{}]", v.iter().map(Self::dbg_print).format(", ")),
            Self::Map(v) => {
                let mut repr = String::from("{");
                let mut first = true;
                for (k, v) in v {
                    if !first {
                        repr.push_str(", ");
                    }
                    first = false;
                    let _ = write!(repr, "{:?}: {}", k, v.dbg_print());
                }
                repr.push('}');
                repr
            }
            Self::Cartesian2D(v) => format!("{v:?}"),
            Self::Cartesian3D(v) => format!("{v:?}"),
            Self::WGS84_2D(v) => format!("{v:?}"),
            Self::WGS84_3D(v) => format!("{v:?}"),
            Self::Date(v) => format!("{v:?}"),
            Self::Time(v) => format!("{v:?}"),
            Self::LocalTime(v) => format!("{v:?}"),
            Self::DateTime(v) => format!("{v:?}"),
            Self::DateTimeZoneId(v) => format!("{v:?}"),
            Self::LocalDateTime(v) => format!("{v:?}"),
            Self::Duration(v) => format!("{v:?}"),
            Self::Node(v) => format!("{v:?}"),
            Self::Relationship(v) => format!("{v:?}"),
            Self::Path(v) => format!("{v:?}"),
            Self::BrokenValue(v) => format!("broken value ({})", v.reason()),
        }
    }
}

impl From<ValueSend> for ValueReceive {
    fn from(v: ValueSend) -> Self {
        match v {
            ValueSend::Null => Self::Null,
            ValueSend::Boolean(v) => Self::Boolean(v),
            ValueSend::Integer(v) => Self::Integer(v),
            ValueSend::Float(v) => Self::Float(v),
            ValueSend::Bytes(v) => Self::Bytes(v),
            ValueSend::String(v) => Self::String(v),
            ValueSend::List(v) => Self::List(v.into_iter().map(Into::into).collect()),
            ValueSend::Map(v) => Self::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect()),
            ValueSend::Cartesian2D(v) => Self::Cartesian2D(v),
            ValueSend::Cartesian3D(v) => Self::Cartesian3D(v),
            ValueSend::WGS84_2D(v) => Self::WGS84_2D(v),
            ValueSend::WGS84_3D(v) => Self::WGS84_3D(v),
            ValueSend::Date(v) => Self::Date(v),
            ValueSend::Time(v) => Self::Time(v),
            ValueSend::LocalTime(v) => Self::LocalTime(v),
            ValueSend::DateTime(v) => Self::DateTime(v),
            ValueSend::LocalDateTime(v) => Self::LocalDateTime(v),
            ValueSend::Duration(v) => Self::Duration(v),
        }
    }
}
