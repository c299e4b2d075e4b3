//! Integrity report command handler

use std::sync::Arc;

use crate::config::Config;
use crate::domain::events::NullSink;
use crate::reconcile::validator::{ReferenceValidator, Severity};
use crate::store::Store;

pub async fn cmd_validate(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(
        &config.general.data_dir,
        ReferenceValidator,
        Arc::new(NullSink),
    )?;

    let findings = store.validate();

    if findings.is_empty() {
        println!("✓ No integrity findings. A commit would succeed.");
        return Ok(());
    }

    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    let warnings = findings.len() - errors;

    println!("Integrity Report ({errors} errors, {warnings} warnings)");
    println!("{:-<70}", "");

    for finding in &findings {
        let marker = match finding.severity {
            Severity::Error => "✗",
            Severity::Warning => "⚠",
        };
        println!("{} {} [{}]", marker, finding.entity, finding.code);
        println!("  {}", finding.message);
    }

    println!();
    if errors > 0 {
        println!("Commits are blocked until the {errors} error(s) above are repaired.");
        println!("A 'demoarr sync' cycle repairs pair inconsistencies automatically.");
    } else {
        println!("Warnings do not block commits.");
    }

    Ok(())
}
