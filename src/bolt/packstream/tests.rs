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

use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
use rstest::rstest;

use super::deserialize::PackStreamDeserializerImpl;
use super::serialize::{write_value, PackStreamSerializer, PackStreamSerializerImpl};
use crate::macros::hash_map;
use crate::value::graph::Node;
use crate::value::spatial::{Cartesian2D, WGS84_2D};
use crate::value::time;
use crate::value::{ValueReceive, ValueSend};

// =============
// Test Decoding
// =============

fn decode(input: Vec<u8>) -> (ValueReceive, Vec<u8>) {
    let mut reader = input.as_slice();
    let mut deserializer = PackStreamDeserializerImpl::new(&mut reader);
    let result = deserializer.load().unwrap();
    let rest = reader.to_vec();
    (result, rest)
}

#[rstest]
#[case(vec![0xC0], ValueReceive::Null)]
#[case(vec![0xC2], ValueReceive::Boolean(false))]
#[case(vec![0xC3], ValueReceive::Boolean(true))]
fn test_decode_special(#[case] input: Vec<u8>, #[case] output: ValueReceive) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, output);
    assert!(rest.is_empty());
}

#[rstest]
#[case(vec![0xF0], ValueReceive::Integer(-16))]
#[case(vec![0xFF], ValueReceive::Integer(-1))]
#[case(vec![0x00], ValueReceive::Integer(0))]
#[case(vec![0x7F], ValueReceive::Integer(127))]
#[case(vec![0xC8, 0x80], ValueReceive::Integer(-128))]
#[case(vec![0xC8, 0xD6], ValueReceive::Integer(-42))]
#[case(vec![0xC9, 0x80, 0x00], ValueReceive::Integer(-32768))]
#[case(vec![0xC9, 0x7F, 0xFF], ValueReceive::Integer(32767))]
#[case(vec![0xCA, 0x80, 0x00, 0x00, 0x00], ValueReceive::Integer(-2147483648))]
#[case(vec![0xCA, 0x7F, 0xFF, 0xFF, 0xFF], ValueReceive::Integer(2147483647))]
#[case(vec![0xCB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
       ValueReceive::Integer(i64::MIN))]
#[case(vec![0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
       ValueReceive::Integer(i64::MAX))]
fn test_decode_integer(#[case] input: Vec<u8>, #[case] output: ValueReceive) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, output);
    assert!(rest.is_empty());
}

#[rstest]
#[case(vec![0xC1, 0x3F, 0xF1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9A], 1.1)]
#[case(vec![0xC1, 0x7F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], f64::INFINITY)]
#[case(vec![0xC1, 0xFF, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], f64::NEG_INFINITY)]
fn test_decode_float(#[case] input: Vec<u8>, #[case] output: f64) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, ValueReceive::Float(output));
    assert!(rest.is_empty());
}

#[rstest]
fn test_decode_nan() {
    let (result, _) = decode(vec![0xC1, 0x7F, 0xF8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    match result {
        ValueReceive::Float(f) => assert!(f.is_nan()),
        _ => panic!("expected float, got {result:?}"),
    }
}

#[rstest]
#[case(vec![0x80], "")]
#[case(vec![0x81, 0x41], "A")]
#[case(vec![0xD0, 0x1A, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A,
            0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76,
            0x77, 0x78, 0x79, 0x7A],
       "abcdefghijklmnopqrstuvwxyz")]
#[case(vec![0x84, 0xF0, 0x9F, 0x98, 0x8A], "😊")]
fn test_decode_string(#[case] input: Vec<u8>, #[case] output: &str) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, ValueReceive::String(String::from(output)));
    assert!(rest.is_empty());
}

#[rstest]
#[case(vec![0xCC, 0x00], vec![])]
#[case(vec![0xCC, 0x03, 0x01, 0x02, 0x03], vec![1, 2, 3])]
fn test_decode_bytes(#[case] input: Vec<u8>, #[case] output: Vec<u8>) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, ValueReceive::Bytes(output));
    assert!(rest.is_empty());
}

#[rstest]
#[case(vec![0x90], vec![])]
#[case(vec![0x93, 0x01, 0x02, 0x03],
       vec![ValueReceive::Integer(1), ValueReceive::Integer(2), ValueReceive::Integer(3)])]
#[case(vec![0x91, 0x91, 0x01],
       vec![ValueReceive::List(vec![ValueReceive::Integer(1)])])]
fn test_decode_list(#[case] input: Vec<u8>, #[case] output: Vec<ValueReceive>) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, ValueReceive::List(output));
    assert!(rest.is_empty());
}

#[rstest]
#[case(vec![0xA0], hash_map!())]
#[case(vec![0xA1, 0x81, 0x61, 0x01],
       hash_map!(String::from("a") => ValueReceive::Integer(1)))]
fn test_decode_dict(#[case] input: Vec<u8>, #[case] output: HashMap<String, ValueReceive>) {
    dbg!(&input);
    let (result, rest) = decode(input);
    assert_eq!(result, ValueReceive::Map(output));
    assert!(rest.is_empty());
}

#[rstest]
fn test_decode_node() {
    // B4 N id 1, labels ["L"], props {}, element_id "e1"
    let input = vec![
        0xB4, 0x4E, 0x01, 0x91, 0x81, 0x4C, 0xA0, 0x82, 0x65, 0x31,
    ];
    let (result, rest) = decode(input);
    assert_eq!(
        result,
        ValueReceive::Node(Node {
            id: 1,
            labels: vec![String::from("L")],
            properties: HashMap::new(),
            element_id: String::from("e1"),
        })
    );
    assert!(rest.is_empty());
}

#[rstest]
fn test_decode_date() {
    // B1 D 19782 == 2024-02-29
    let input = vec![0xB1, 0x44, 0xC9, 0x4D, 0x46];
    let (result, rest) = decode(input);
    assert_eq!(
        result,
        ValueReceive::Date(time::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))
    );
    assert!(rest.is_empty());
}

#[rstest]
fn test_decode_unknown_struct_is_broken_not_fatal() {
    let input = vec![0xB1, 0xEE, 0x01];
    let (result, rest) = decode(input);
    match result {
        ValueReceive::BrokenValue(broken) => {
            assert!(broken.reason().contains("unknown structure"));
        }
        _ => panic!("expected broken value, got {result:?}"),
    }
    assert!(rest.is_empty());
}

#[rstest]
#[case(vec![0xC7])]
#[case(vec![0xDC])]
fn test_decode_unknown_marker_fails(#[case] input: Vec<u8>) {
    let mut reader = input.as_slice();
    let mut deserializer = PackStreamDeserializerImpl::new(&mut reader);
    assert!(deserializer.load().is_err());
}

#[rstest]
fn test_decode_short_read_fails() {
    let mut reader = &[0xC1, 0x00][..];
    let mut deserializer = PackStreamDeserializerImpl::new(&mut reader);
    assert!(deserializer.load().is_err());
}

// =============
// Test Encoding
// =============

fn encode(value: &ValueSend) -> Vec<u8> {
    let mut buff = Vec::new();
    let mut serializer = PackStreamSerializerImpl::new(&mut buff);
    write_value(&mut serializer, value).unwrap();
    buff
}

#[rstest]
#[case(ValueSend::Null, vec![0xC0])]
#[case(ValueSend::Boolean(true), vec![0xC3])]
#[case(ValueSend::Boolean(false), vec![0xC2])]
#[case(ValueSend::Integer(1), vec![0x01])]
#[case(ValueSend::Integer(-16), vec![0xF0])]
#[case(ValueSend::Integer(-17), vec![0xC8, 0xEF])]
#[case(ValueSend::Integer(128), vec![0xC9, 0x00, 0x80])]
#[case(ValueSend::Integer(-32_769), vec![0xCA, 0xFF, 0xFF, 0x7F, 0xFF])]
#[case(ValueSend::Integer(2_147_483_648),
       vec![0xCB, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00])]
#[case(ValueSend::Float(1.1), vec![0xC1, 0x3F, 0xF1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9A])]
#[case(ValueSend::String(String::from("A")), vec![0x81, 0x41])]
#[case(ValueSend::Bytes(vec![1, 2]), vec![0xCC, 0x02, 0x01, 0x02])]
#[case(ValueSend::List(vec![ValueSend::Integer(1)]), vec![0x91, 0x01])]
fn test_encode(#[case] input: ValueSend, #[case] output: Vec<u8>) {
    dbg!(&input);
    assert_eq!(encode(&input), output);
}

#[rstest]
fn test_encode_cartesian_point() {
    let encoded = encode(&ValueSend::Cartesian2D(Cartesian2D::new(1.0, 2.0)));
    assert_eq!(encoded[..2], [0xB3, 0x58]);
    let (decoded, _) = decode(encoded);
    assert_eq!(
        decoded,
        ValueReceive::Cartesian2D(Cartesian2D::new(1.0, 2.0))
    );
}

#[rstest]
fn test_encode_wgs84_point_keeps_srid() {
    let encoded = encode(&ValueSend::WGS84_2D(WGS84_2D::new(1.0, 2.0)));
    let (decoded, _) = decode(encoded);
    assert_eq!(decoded, ValueReceive::WGS84_2D(WGS84_2D::new(1.0, 2.0)));
}

#[rstest]
fn test_encode_temporal_round_trip() {
    let offset = FixedOffset::east_opt(3600).unwrap();
    let values = [
        ValueSend::Date(time::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap())),
        ValueSend::LocalTime(time::LocalTime(
            NaiveTime::from_hms_nano_opt(23, 59, 59, 1).unwrap(),
        )),
        ValueSend::Time(time::Time {
            time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            utc_offset_seconds: 3600,
        }),
        ValueSend::DateTime(time::DateTime(
            offset.with_ymd_and_hms(2023, 6, 1, 10, 30, 0).unwrap(),
        )),
        ValueSend::Duration(time::Duration::new(1, 2, 3, 4)),
    ];
    for value in values {
        dbg!(&value);
        let (decoded, rest) = decode(encode(&value));
        assert_eq!(decoded, ValueReceive::from(value));
        assert!(rest.is_empty());
    }
}

#[rstest]
fn test_encode_dict() {
    let mut map = HashMap::new();
    map.insert(String::from("a"), ValueSend::Integer(1));
    let encoded = encode(&ValueSend::Map(map));
    assert_eq!(encoded, vec![0xA1, 0x81, 0x61, 0x01]);
}

#[rstest]
fn test_large_string_header() {
    let mut buff = Vec::new();
    let mut serializer = PackStreamSerializerImpl::new(&mut buff);
    let s = "x".repeat(256);
    serializer.write_string(&s).unwrap();
    assert_eq!(buff[..3], [0xD1, 0x01, 0x00]);
    assert_eq!(buff.len(), 3 + 256);
}
