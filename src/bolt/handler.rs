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

use super::streams::StreamHandle;

/// The pending response handler enqueued with each request.
///
/// The connection dispatches every inbound message against the handler at
/// the head of the queue, matching the handler variant with the message
/// kind (success, record, failure, ignored). A record keeps the handler at
/// the head (a `PULL` delivers many records before its terminating
/// success); everything else pops it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ResponseHandler {
    Hello,
    Logon,
    Begin,
    Run { stream: StreamHandle },
    Pull { stream: StreamHandle },
    Discard { stream: StreamHandle },
    Commit,
    Rollback,
    Reset,
    Route,
}

impl ResponseHandler {
    pub(crate) fn request_name(&self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Logon => "LOGON",
            Self::Begin => "BEGIN",
            Self::Run { .. } => "RUN",
            Self::Pull { .. } => "PULL",
            Self::Discard { .. } => "DISCARD",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Reset => "RESET",
            Self::Route => "ROUTE",
        }
    }

    pub(crate) fn is_reset(&self) -> bool {
        matches!(self, Self::Reset)
    }
}
