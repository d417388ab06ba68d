/*
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

const PORTS: &str = r#"
[topology]
    sockets = [[0, 1, 2, 3]]

[[ports]]
    name = "cap0"
    device = "net_null0"

[[ports]]
    name = "cap1"
    device = "net_ring0"
"#;

fn run_with(name: &str, toml: &str) -> Output {
    let path: PathBuf = std::env::temp_dir().join(format!(
        "netflow-probe-{}-{}.toml",
        name,
        std::process::id()
    ));
    fs::write(&path, toml).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_netflow-probe"))
        .arg("-f")
        .arg(&path)
        .env("RUST_LOG", "info")
        .output()
        .unwrap();

    let _ = fs::remove_file(&path);
    output
}

fn config(extra: &str) -> String {
    format!(
        r#"
app_name = "probe"
worker_cores = [0, 1]
{}

[mempool]
    capacity = 2047
    cache_size = 32

[flow_table]
    entries = 1024
{}"#,
        extra, PORTS
    )
}

#[test]
fn brings_up_and_exits_cleanly() {
    let output = run_with("ok", &config(""));

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("----------- MEMORY_SEGMENTS -----------"));
    assert!(stdout.contains("name:<probe_pool_0>"));
    assert!(stdout.contains("name:<probe_flow_table_0>"));
}

#[test]
fn no_dump_when_disabled() {
    let output = run_with("quiet", &config("dump_memory = false"));

    assert!(output.status.success());
    assert!(!String::from_utf8_lossy(&output.stdout).contains("MEMORY_SEGMENTS"));
}

#[test]
fn pool_failure_exits_with_1() {
    let output = run_with("nomem", &config("socket_mem = [0]"));

    assert_eq!(Some(1), output.status.code());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR"));
    assert!(stderr.contains("socket0"));
}

#[test]
fn invalid_config_exits_with_1() {
    let output = run_with("invalid", &config("[rxtx]\n    rxqs = 0"));

    assert_eq!(Some(1), output.status.code());
    assert!(String::from_utf8_lossy(&output.stderr).contains("rxtx.rxqs"));
}

#[test]
fn missing_file_exits_with_1() {
    let output = Command::new(env!("CARGO_BIN_EXE_netflow-probe"))
        .arg("-f")
        .arg("/nonexistent/netflow.toml")
        .output()
        .unwrap();

    assert_eq!(Some(1), output.status.code());
}
