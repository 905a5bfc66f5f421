//! Configuration validation.

use super::{Config, NodeConfig};
use crate::check::CheckMethod;
use crate::core::identifier::validate_identifier;
use crate::error::{CheckError, Result};

const SUPPORTED_TYPES: [&str; 2] = ["mysql", "postgres"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_node("reference", &config.reference)?;

    if config.targets.is_empty() {
        return Err(CheckError::Config(
            "at least one target is required".into(),
        ));
    }
    for (i, target) in config.targets.iter().enumerate() {
        validate_node(&format!("targets[{}]", i), target)?;

        if target.host == config.reference.host
            && target.port() == config.reference.port()
            && target.database == config.reference.database
        {
            return Err(CheckError::Config(format!(
                "targets[{}] is the same database as the reference",
                i
            )));
        }
    }

    CheckMethod::parse(&config.check.method)?;

    if config.check.granularity == 0 {
        return Err(CheckError::Config(
            "check.granularity must be at least 1".into(),
        ));
    }
    if config.check.timeout_secs == 0 {
        return Err(CheckError::Config(
            "check.timeout_secs must be at least 1".into(),
        ));
    }
    if config.check.poll_interval_ms == 0 {
        return Err(CheckError::Config(
            "check.poll_interval_ms must be at least 1".into(),
        ));
    }
    if let (Some(from), Some(till)) = (config.check.row_from, config.check.row_till) {
        if from > till {
            return Err(CheckError::Config(format!(
                "check.row_from ({}) is past check.row_till ({})",
                from, till
            )));
        }
    }
    if let Some(schema) = &config.check.schema {
        validate_identifier(schema)?;
    }
    for table in &config.check.tables {
        validate_identifier(table)?;
    }

    validate_identifier(&config.store.metadata_schema)?;

    Ok(())
}

fn validate_node(label: &str, node: &NodeConfig) -> Result<()> {
    if !SUPPORTED_TYPES.contains(&node.r#type.as_str()) {
        return Err(CheckError::UnsupportedDialect(node.r#type.clone()));
    }
    if node.host.is_empty() {
        return Err(CheckError::Config(format!("{}.host is required", label)));
    }
    if node.database.is_empty() {
        return Err(CheckError::Config(format!("{}.database is required", label)));
    }
    if node.user.is_empty() {
        return Err(CheckError::Config(format!("{}.user is required", label)));
    }
    Ok(())
}
