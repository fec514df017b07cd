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

use std::env;

fn main() {
    let product = format!(
        "neo4j-bolt-rust/{}",
        env::var("CARGO_PKG_VERSION").unwrap()
    );
    println!("Setting bolt agent product to: {}", product);
    println!("cargo:rustc-env=NEO4J_BOLT_AGENT_PRODUCT={}", product);
}
