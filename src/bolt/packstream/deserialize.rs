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
use std::io::Read;

use usize_cast::IntoIsize;

use super::error::PackStreamDeserializeError;
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::spatial::{
    Cartesian2D, Cartesian3D, SRID_CARTESIAN_2D, SRID_CARTESIAN_3D, SRID_WGS84_2D, SRID_WGS84_3D,
    WGS84_2D, WGS84_3D,
};
use crate::value::time::{Date, DateTime, DateTimeZoneId, Duration, LocalDateTime, LocalTime, Time};
use crate::value::{BrokenValueInner, ValueReceive};

type Result<T> = std::result::Result<T, PackStreamDeserializeError>;

const TAG_2D_POINT: u8 = 0x58;
const TAG_3D_POINT: u8 = 0x59;
const TAG_DATE: u8 = 0x44;
const TAG_TIME: u8 = 0x54;
const TAG_LOCAL_TIME: u8 = 0x74;
const TAG_DATE_TIME: u8 = 0x49;
const TAG_DATE_TIME_ZONE_ID: u8 = 0x69;
const TAG_LOCAL_DATE_TIME: u8 = 0x64;
const TAG_DURATION: u8 = 0x45;
const TAG_NODE: u8 = 0x4E;
const TAG_RELATIONSHIP: u8 = 0x52;
const TAG_UNBOUND_RELATIONSHIP: u8 = 0x72;
const TAG_PATH: u8 = 0x50;

pub(crate) struct PackStreamDeserializerImpl<'a, R: Read> {
    reader: &'a mut R,
}

impl<'a, R: Read> PackStreamDeserializerImpl<'a, R> {
    pub(crate) fn new(reader: &'a mut R) -> Self {
        Self { reader }
    }

    /// Loads exactly one value, hydrating typed structures along the way.
    ///
    /// Structures that cannot be hydrated (unknown tag, malformed fields)
    /// become [`ValueReceive::BrokenValue`]; only a failed read or a
    /// violated marker grammar is an error.
    pub(crate) fn load(&mut self) -> Result<ValueReceive> {
        let marker = self.read_u8()?;
        if marker <= 0x7F || marker >= 0xF0 {
            Ok(ValueReceive::Integer(i64::from(marker as i8)))
        } else if (0x80..=0x8F).contains(&marker) {
            let s = self.read_string(usize::from(marker - 0x80))?;
            Ok(ValueReceive::String(s))
        } else if (0x90..=0x9F).contains(&marker) {
            self.read_list(usize::from(marker - 0x90))
        } else if (0xA0..=0xAF).contains(&marker) {
            self.read_dict(usize::from(marker - 0xA0))
        } else if (0xB0..=0xBF).contains(&marker) {
            self.read_struct(usize::from(marker - 0xB0))
        } else {
            match marker {
                0xC0 => Ok(ValueReceive::Null),
                0xC1 => {
                    let mut bytes = [0; 8];
                    self.read_exact(&mut bytes)?;
                    Ok(ValueReceive::Float(f64::from_be_bytes(bytes)))
                }
                0xC2 => Ok(ValueReceive::Boolean(false)),
                0xC3 => Ok(ValueReceive::Boolean(true)),
                0xC8 => {
                    let mut bytes = [0; 1];
                    self.read_exact(&mut bytes)?;
                    Ok(ValueReceive::Integer(i64::from(i8::from_be_bytes(bytes))))
                }
                0xC9 => {
                    let mut bytes = [0; 2];
                    self.read_exact(&mut bytes)?;
                    Ok(ValueReceive::Integer(i64::from(i16::from_be_bytes(bytes))))
                }
                0xCA => {
                    let mut bytes = [0; 4];
                    self.read_exact(&mut bytes)?;
                    Ok(ValueReceive::Integer(i64::from(i32::from_be_bytes(bytes))))
                }
                0xCB => {
                    let mut bytes = [0; 8];
                    self.read_exact(&mut bytes)?;
                    Ok(ValueReceive::Integer(i64::from_be_bytes(bytes)))
                }
                0xCC => {
                    let size = self.read_u8()?;
                    self.read_bytes(usize::from(size))
                }
                0xCD => {
                    let size = self.read_u16()?;
                    self.read_bytes(usize::from(size))
                }
                0xCE => {
                    let size = self.read_usize_u32()?;
                    self.read_bytes(size)
                }
                0xD0 => {
                    let size = self.read_u8()?;
                    Ok(ValueReceive::String(self.read_string(usize::from(size))?))
                }
                0xD1 => {
                    let size = self.read_u16()?;
                    Ok(ValueReceive::String(self.read_string(usize::from(size))?))
                }
                0xD2 => {
                    let size = self.read_usize_u32()?;
                    Ok(ValueReceive::String(self.read_string(size)?))
                }
                0xD4 => {
                    let size = self.read_u8()?;
                    self.read_list(usize::from(size))
                }
                0xD5 => {
                    let size = self.read_u16()?;
                    self.read_list(usize::from(size))
                }
                0xD6 => {
                    let size = self.read_usize_u32()?;
                    self.read_list(size)
                }
                0xD8 => {
                    let size = self.read_u8()?;
                    self.read_dict(usize::from(size))
                }
                0xD9 => {
                    let size = self.read_u16()?;
                    self.read_dict(usize::from(size))
                }
                0xDA => {
                    let size = self.read_usize_u32()?;
                    self.read_dict(size)
                }
                marker => Err(format!("unknown pack stream marker {marker:02X?}").into()),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut bytes = [0; 2];
        self.read_exact(&mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    fn read_usize_u32(&mut self) -> Result<usize> {
        let mut bytes = [0; 4];
        self.read_exact(&mut bytes)?;
        let size = u32::from_be_bytes(bytes);
        usize::try_from(size).map_err(|_| format!("size {size} doesn't fit usize").into())
    }

    fn read_bytes(&mut self, size: usize) -> Result<ValueReceive> {
        let mut bytes = vec![0; size];
        self.read_exact(&mut bytes)?;
        Ok(ValueReceive::Bytes(bytes))
    }

    fn read_string(&mut self, size: usize) -> Result<String> {
        let mut bytes = vec![0; size];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| format!("invalid string encoding: {e}").into())
    }

    fn read_list(&mut self, size: usize) -> Result<ValueReceive> {
        let mut list = Vec::with_capacity(size);
        for _ in 0..size {
            list.push(self.load()?);
        }
        Ok(ValueReceive::List(list))
    }

    fn read_dict(&mut self, size: usize) -> Result<ValueReceive> {
        let mut dict = HashMap::with_capacity(size);
        for _ in 0..size {
            let key = match self.load()? {
                ValueReceive::String(key) => key,
                v => return Err(format!("expected dictionary key string, found {v:?}").into()),
            };
            dict.insert(key, self.load()?);
        }
        Ok(ValueReceive::Map(dict))
    }

    fn read_struct(&mut self, size: usize) -> Result<ValueReceive> {
        let tag = self.read_u8()?;
        let mut fields = Vec::with_capacity(size);
        for _ in 0..size {
            fields.push(self.load()?);
        }
        Ok(hydrate_struct(tag, fields))
    }
}

fn invalid_struct(reason: String) -> ValueReceive {
    BrokenValueInner::Reason(reason).into()
}

macro_rules! as_int {
    ($value:expr, $name:literal) => {
        match $value {
            ValueReceive::Integer(i) => i,
            v => return invalid_struct(format!("expected {} integer, found {v:?}", $name)),
        }
    };
}

macro_rules! as_float {
    ($value:expr, $name:literal) => {
        match $value {
            ValueReceive::Float(f) => f,
            v => return invalid_struct(format!("expected {} float, found {v:?}", $name)),
        }
    };
}

macro_rules! as_string {
    ($value:expr, $name:literal) => {
        match $value {
            ValueReceive::String(s) => s,
            v => return invalid_struct(format!("expected {} string, found {v:?}", $name)),
        }
    };
}

macro_rules! as_vec {
    ($value:expr, $name:literal) => {
        match $value {
            ValueReceive::List(l) => l,
            v => return invalid_struct(format!("expected {} list, found {v:?}", $name)),
        }
    };
}

macro_rules! as_map {
    ($value:expr, $name:literal) => {
        match $value {
            ValueReceive::Map(m) => m,
            v => return invalid_struct(format!("expected {} map, found {v:?}", $name)),
        }
    };
}

macro_rules! assert_struct_size {
    ($name:literal, $fields:expr, $expected:literal) => {
        if $fields.len() != $expected {
            return invalid_struct(format!(
                "expected {} fields for {} struct, found {}",
                $expected,
                $name,
                $fields.len()
            ));
        }
    };
}

fn hydrate_struct(tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
    let mut fields = VecDeque::from(fields);
    match tag {
        TAG_2D_POINT => {
            assert_struct_size!("2D point", fields, 3);
            let srid = as_int!(fields.pop_front().unwrap(), "2D point srid");
            let x = as_float!(fields.pop_front().unwrap(), "2D point x");
            let y = as_float!(fields.pop_front().unwrap(), "2D point y");
            match srid {
                SRID_CARTESIAN_2D => ValueReceive::Cartesian2D(Cartesian2D::new(x, y)),
                SRID_WGS84_2D => ValueReceive::WGS84_2D(WGS84_2D::new(x, y)),
                srid => invalid_struct(format!("unknown 2D point srid {srid}")),
            }
        }
        TAG_3D_POINT => {
            assert_struct_size!("3D point", fields, 4);
            let srid = as_int!(fields.pop_front().unwrap(), "3D point srid");
            let x = as_float!(fields.pop_front().unwrap(), "3D point x");
            let y = as_float!(fields.pop_front().unwrap(), "3D point y");
            let z = as_float!(fields.pop_front().unwrap(), "3D point z");
            match srid {
                SRID_CARTESIAN_3D => ValueReceive::Cartesian3D(Cartesian3D::new(x, y, z)),
                SRID_WGS84_3D => ValueReceive::WGS84_3D(WGS84_3D::new(x, y, z)),
                srid => invalid_struct(format!("unknown 3D point srid {srid}")),
            }
        }
        TAG_DATE => {
            assert_struct_size!("date", fields, 1);
            let days = as_int!(fields.pop_front().unwrap(), "date days");
            match Date::from_days_since_epoch(days) {
                Some(date) => ValueReceive::Date(date),
                None => invalid_struct(format!("date out of range: {days} days since epoch")),
            }
        }
        TAG_TIME => {
            assert_struct_size!("time", fields, 2);
            let nanos = as_int!(fields.pop_front().unwrap(), "time nanoseconds");
            let offset = as_int!(fields.pop_front().unwrap(), "time utc offset");
            match Time::from_wire(nanos, offset) {
                Some(time) => ValueReceive::Time(time),
                None => invalid_struct(format!("time out of range: {nanos}ns, offset {offset}s")),
            }
        }
        TAG_LOCAL_TIME => {
            assert_struct_size!("local time", fields, 1);
            let nanos = as_int!(fields.pop_front().unwrap(), "local time nanoseconds");
            match LocalTime::from_nanos_since_midnight(nanos) {
                Some(time) => ValueReceive::LocalTime(time),
                None => invalid_struct(format!("local time out of range: {nanos}ns")),
            }
        }
        TAG_DATE_TIME => {
            assert_struct_size!("date time", fields, 3);
            let seconds = as_int!(fields.pop_front().unwrap(), "date time seconds");
            let nanos = as_int!(fields.pop_front().unwrap(), "date time nanoseconds");
            let offset = as_int!(fields.pop_front().unwrap(), "date time utc offset");
            match DateTime::from_wire(seconds, nanos, offset) {
                Some(dt) => ValueReceive::DateTime(dt),
                None => invalid_struct(format!(
                    "date time out of range: {seconds}s {nanos}ns offset {offset}s"
                )),
            }
        }
        TAG_DATE_TIME_ZONE_ID => {
            assert_struct_size!("zoned date time", fields, 3);
            let seconds = as_int!(fields.pop_front().unwrap(), "zoned date time seconds");
            let nanos = as_int!(fields.pop_front().unwrap(), "zoned date time nanoseconds");
            let zone_id = as_string!(fields.pop_front().unwrap(), "zoned date time zone id");
            match DateTimeZoneId::from_wire(seconds, nanos, zone_id) {
                Some(dt) => ValueReceive::DateTimeZoneId(dt),
                None => invalid_struct(format!(
                    "zoned date time out of range: {seconds}s {nanos}ns"
                )),
            }
        }
        TAG_LOCAL_DATE_TIME => {
            assert_struct_size!("local date time", fields, 2);
            let seconds = as_int!(fields.pop_front().unwrap(), "local date time seconds");
            let nanos = as_int!(fields.pop_front().unwrap(), "local date time nanoseconds");
            match LocalDateTime::from_wire(seconds, nanos) {
                Some(dt) => ValueReceive::LocalDateTime(dt),
                None => invalid_struct(format!(
                    "local date time out of range: {seconds}s {nanos}ns"
                )),
            }
        }
        TAG_DURATION => {
            assert_struct_size!("duration", fields, 4);
            let months = as_int!(fields.pop_front().unwrap(), "duration months");
            let days = as_int!(fields.pop_front().unwrap(), "duration days");
            let seconds = as_int!(fields.pop_front().unwrap(), "duration seconds");
            let nanos = as_int!(fields.pop_front().unwrap(), "duration nanoseconds");
            ValueReceive::Duration(Duration::new(months, days, seconds, nanos))
        }
        TAG_NODE => {
            assert_struct_size!("node", fields, 4);
            let id = as_int!(fields.pop_front().unwrap(), "node id");
            let raw_labels = as_vec!(fields.pop_front().unwrap(), "node labels");
            let mut labels = Vec::with_capacity(raw_labels.len());
            for label in raw_labels {
                labels.push(as_string!(label, "node label"));
            }
            let properties = as_map!(fields.pop_front().unwrap(), "node properties");
            let element_id = as_string!(fields.pop_front().unwrap(), "node element_id");
            ValueReceive::Node(Node {
                id,
                labels,
                properties,
                element_id,
            })
        }
        TAG_RELATIONSHIP => {
            assert_struct_size!("relationship", fields, 8);
            let id = as_int!(fields.pop_front().unwrap(), "relationship id");
            let start_node_id = as_int!(fields.pop_front().unwrap(), "relationship start_node_id");
            let end_node_id = as_int!(fields.pop_front().unwrap(), "relationship end_node_id");
            let type_ = as_string!(fields.pop_front().unwrap(), "relationship type");
            let properties = as_map!(fields.pop_front().unwrap(), "relationship properties");
            let element_id = as_string!(fields.pop_front().unwrap(), "relationship element_id");
            let start_node_element_id = as_string!(
                fields.pop_front().unwrap(),
                "relationship start_node_element_id"
            );
            let end_node_element_id = as_string!(
                fields.pop_front().unwrap(),
                "relationship end_node_element_id"
            );
            ValueReceive::Relationship(Relationship {
                id,
                start_node_id,
                end_node_id,
                type_,
                properties,
                element_id,
                start_node_element_id,
                end_node_element_id,
            })
        }
        TAG_PATH => {
            assert_struct_size!("path", fields, 3);
            let raw_nodes = as_vec!(fields.pop_front().unwrap(), "path nodes");
            let mut nodes = Vec::with_capacity(raw_nodes.len());
            for node in raw_nodes {
                nodes.push(match node {
                    ValueReceive::Node(node) => node,
                    v => return invalid_struct(format!("expected path node, found {v:?}")),
                });
            }
            let raw_relationships = as_vec!(fields.pop_front().unwrap(), "path relationships");
            let mut relationships = Vec::with_capacity(raw_relationships.len());
            for relationship in raw_relationships {
                // Unbound relationships only ever appear inside paths, so
                // they surface here as unknown structures.
                relationships.push(match relationship {
                    ValueReceive::BrokenValue(broken) => match broken.inner {
                        BrokenValueInner::UnknownStruct {
                            tag: TAG_UNBOUND_RELATIONSHIP,
                            fields: mut rel_fields,
                        } => {
                            assert_struct_size!("unbound relationship", rel_fields, 4);
                            let id =
                                as_int!(rel_fields.pop_front().unwrap(), "unbound relationship id");
                            let type_ = as_string!(
                                rel_fields.pop_front().unwrap(),
                                "unbound relationship type"
                            );
                            let properties = as_map!(
                                rel_fields.pop_front().unwrap(),
                                "unbound relationship properties"
                            );
                            let element_id = as_string!(
                                rel_fields.pop_front().unwrap(),
                                "unbound relationship element_id"
                            );
                            UnboundRelationship {
                                id,
                                type_,
                                properties,
                                element_id,
                            }
                        }
                        inner => {
                            return invalid_struct(format!(
                                "expected path relationship to be an unbound relationship, \
                                 found {inner:?}"
                            ))
                        }
                    },
                    v => {
                        return invalid_struct(format!(
                            "expected path relationship to be an unbound relationship, found {v:?}"
                        ))
                    }
                });
            }
            let raw_indices = as_vec!(fields.pop_front().unwrap(), "path indices");
            let mut indices = Vec::with_capacity(raw_indices.len());
            for index in raw_indices {
                indices.push(as_int!(index, "path index").into_isize());
            }
            ValueReceive::Path(Path {
                nodes,
                relationships,
                indices,
            })
        }
        tag => BrokenValueInner::UnknownStruct { tag, fields }.into(),
    }
}
