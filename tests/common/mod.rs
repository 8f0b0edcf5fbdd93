//! A scripted stand-in for `nft` and the init scripts.
//!
//! `nft` calls are applied to an in-memory chain and set table so listings
//! reflect earlier inserts and deletes. Every other program is recorded and
//! answered with `restart_status`.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pinpoint::command::{CommandError, CommandOutput, CommandRunner};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeRule {
    pub handle: u64,
    pub statement: String,
    pub comment: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    next_handle: u64,
    pub rules: Vec<FakeRule>,
    pub sets: BTreeMap<String, BTreeSet<String>>,
    /// `program arg arg ...` for every call, in order.
    pub calls: Vec<String>,
    pub fail_listing: bool,
    pub restart_status: i32,
    pub spawn_error: bool,
}

impl FakeState {
    pub fn statements(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.statement.as_str()).collect()
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Debug, Default)]
pub struct FakeSystem {
    state: Mutex<FakeState>,
}

impl FakeSystem {
    /// A chain holding only the global `tunnel_nets` rule, plus that set.
    pub fn with_global_rule() -> Arc<Self> {
        let fake = Arc::new(Self::default());
        {
            let mut state = fake.state();
            let handle = state.handle();
            state.rules.push(FakeRule {
                handle,
                statement: "ip daddr @tunnel_nets meta mark set 0x100 counter".into(),
                comment: None,
            });
            state.sets.insert("tunnel_nets".into(), BTreeSet::new());
            state.sets.insert("tunnel_ips".into(), BTreeSet::new());
        }
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn nft(state: &mut FakeState, args: &[&str]) -> CommandOutput {
        match args {
            ["-j", "-a", "list", "chain", family, table, chain] => {
                if state.fail_listing {
                    return CommandOutput::failed(1, "Error: No such file or directory");
                }
                let mut items = vec![json!({"metainfo": {"version": "1.0.9", "json_schema_version": 1}})];
                items.extend(state.rules.iter().map(|r| {
                    let mut rule = json!({
                        "family": family,
                        "table": table,
                        "chain": chain,
                        "handle": r.handle,
                        "expr": [],
                    });
                    if let Some(comment) = &r.comment {
                        rule["comment"] = Value::String(comment.clone());
                    }
                    json!({ "rule": rule })
                }));
                CommandOutput::ok(json!({ "nftables": items }).to_string())
            }
            ["-j", "list", "sets", family, table] => {
                if state.fail_listing {
                    return CommandOutput::failed(1, "Error: No such file or directory");
                }
                let items: Vec<Value> = state
                    .sets
                    .keys()
                    .enumerate()
                    .map(|(i, name)| {
                        json!({"set": {"family": family, "name": name, "table": table, "type": "ipv4_addr", "handle": i + 100}})
                    })
                    .collect();
                CommandOutput::ok(json!({ "nftables": items }).to_string())
            }
            ["delete", "rule", _, _, _, "handle", handle] => {
                let before = state.rules.len();
                state.rules.retain(|r| r.handle.to_string() != *handle);
                if state.rules.len() == before {
                    CommandOutput::failed(1, "Error: Could not process rule")
                } else {
                    CommandOutput::ok("")
                }
            }
            ["insert", "rule", _, _, _, rest @ ..] => {
                let (statement, comment) = match rest {
                    [statement @ .., "comment", comment] => {
                        (statement, Some(comment.trim_matches('"').to_string()))
                    }
                    statement => (statement, None),
                };
                let handle = state.handle();
                state.rules.insert(
                    0,
                    FakeRule {
                        handle,
                        statement: statement.join(" "),
                        comment,
                    },
                );
                CommandOutput::ok("")
            }
            ["add", "set", _, _, name, ..] => {
                state.sets.entry(name.to_string()).or_default();
                CommandOutput::ok("")
            }
            ["delete", "set", _, _, name] => match state.sets.remove(*name) {
                Some(_) => CommandOutput::ok(""),
                None => CommandOutput::failed(1, "Error: No such file or directory"),
            },
            ["flush", "set", _, _, name] => match state.sets.get_mut(*name) {
                Some(set) => {
                    set.clear();
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(1, "Error: No such file or directory"),
            },
            ["add", "element", _, _, name, "{", element, "}"] => match state.sets.get_mut(*name) {
                Some(set) => {
                    set.insert(element.to_string());
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(1, "Error: No such file or directory"),
            },
            other => CommandOutput::failed(1, format!("unsupported: {}", other.join(" "))),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeSystem {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut state = self.state();
        let mut line = vec![program.to_string()];
        line.extend(args.iter().cloned());
        state.calls.push(line.join(" "));

        if program == "nft" {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            return Ok(Self::nft(&mut state, &args));
        }
        if state.spawn_error {
            return Err(CommandError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        Ok(match state.restart_status {
            0 => CommandOutput::ok(""),
            code => CommandOutput::failed(code, "restart failed"),
        })
    }
}
