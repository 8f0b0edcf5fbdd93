//! Thin async wrapper over the `nft` CLI scoped to one table.

pub mod devices;
pub mod listing;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::config::NftSettings;

pub use devices::{CompileReport, DevicePlan, DeviceSet, PlannedRule};
pub use listing::{RuleEntry, SetEntry};

#[derive(Debug, Error)]
pub enum NftError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("nft {args} failed: {stderr}")]
    Failed { args: String, stderr: String },
    #[error("unexpected nft listing output: {0}")]
    Listing(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct Nft {
    binary: String,
    family: String,
    table: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl Nft {
    pub fn new(settings: &NftSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: settings.binary.clone(),
            family: settings.family.clone(),
            table: settings.table.clone(),
            timeout: settings.command_timeout(),
            runner,
        }
    }

    /// Run `nft <args>`; a non-zero exit is an error.
    pub async fn exec(&self, args: Vec<String>) -> Result<CommandOutput, NftError> {
        let output = self.runner.run(&self.binary, &args, self.timeout).await?;
        if !output.success() {
            return Err(NftError::Failed {
                args: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// `[verb, object, family, table]` followed by `rest`.
    fn args(&self, verb: &str, object: &str, rest: &[&str]) -> Vec<String> {
        let mut args = vec![
            verb.to_string(),
            object.to_string(),
            self.family.clone(),
            self.table.clone(),
        ];
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    // ========================================================================
    // Listing
    // ========================================================================

    pub async fn list_rules(&self, chain: &str) -> Result<Vec<RuleEntry>, NftError> {
        let mut args = vec!["-j".to_string(), "-a".to_string()];
        args.extend(self.args("list", "chain", &[chain]));
        let output = self.exec(args).await?;
        Ok(listing::parse_rules(&output.stdout)?)
    }

    pub async fn list_sets(&self) -> Result<Vec<SetEntry>, NftError> {
        let mut args = vec!["-j".to_string()];
        args.extend(self.args("list", "sets", &[]));
        let output = self.exec(args).await?;
        Ok(listing::parse_sets(&output.stdout)?)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub async fn delete_rule(&self, chain: &str, handle: u64) -> Result<(), NftError> {
        let handle = handle.to_string();
        self.exec(self.args("delete", "rule", &[chain, "handle", &handle]))
            .await
            .map(drop)
    }

    /// Insert at the head of `chain`.
    pub async fn insert_rule(
        &self,
        chain: &str,
        statement: &[String],
        comment: &str,
    ) -> Result<(), NftError> {
        let mut args = self.args("insert", "rule", &[chain]);
        args.extend(statement.iter().cloned());
        args.push("comment".to_string());
        args.push(format!("\"{comment}\""));
        self.exec(args).await.map(drop)
    }

    /// Create an interval set of IPv4 addresses.
    pub async fn add_ipv4_set(&self, name: &str) -> Result<(), NftError> {
        self.exec(self.args(
            "add",
            "set",
            &[name, "{", "type", "ipv4_addr;", "flags", "interval;", "}"],
        ))
        .await
        .map(drop)
    }

    pub async fn delete_set(&self, name: &str) -> Result<(), NftError> {
        self.exec(self.args("delete", "set", &[name])).await.map(drop)
    }

    pub async fn flush_set(&self, name: &str) -> Result<(), NftError> {
        self.exec(self.args("flush", "set", &[name])).await.map(drop)
    }

    pub async fn add_element(&self, set: &str, element: &str) -> Result<(), NftError> {
        self.exec(self.args("add", "element", &[set, "{", element, "}"]))
            .await
            .map(drop)
    }
}
