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

//! PackStream: the value serialization format spoken inside Bolt messages.
//!
//! The serializer half is the packer, the deserializer half the hydrator:
//! it turns inbound bytes into fully typed [`ValueReceive`]s including the
//! graph and temporal structures.
//!
//! [`ValueReceive`]: crate::value::ValueReceive

mod deserialize;
mod error;
mod serialize;

#[cfg(test)]
mod tests;

pub(crate) use deserialize::PackStreamDeserializerImpl;
pub(crate) use error::{PackStreamDeserializeError, PackStreamSerializeError};
pub(crate) use serialize::{
    write_value, PackStreamSerializer, PackStreamSerializerDebugImpl, PackStreamSerializerImpl,
};
