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

/// The connection's view of the server-side state machine.
///
/// Every operation is gated on the current state; protocol events move it
/// along:
///
/// * `Unauthorized → Ready` on a successful handshake,
/// * `Ready ↔ Tx` via begin and commit/rollback,
/// * `Ready → Streaming` / `Tx → StreamingTx` on a successful run, back
///   again once the last stream terminates,
/// * any state `→ Failed` on a recoverable server error (cured by reset),
/// * any state `→ Dead` on a fatal error or close.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub(crate) enum ConnectionState {
    Unauthorized,
    Ready,
    Streaming,
    Tx,
    StreamingTx,
    Failed,
    Dead,
}

impl ConnectionState {
    pub(crate) fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming | Self::StreamingTx)
    }
}
