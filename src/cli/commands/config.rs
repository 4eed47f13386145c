//! `buildrelay config`

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::{Config, ExitCode, emit_jcs};

#[derive(Serialize)]
struct Entry<'a> {
    value: &'a str,
    source: &'a str,
}

pub fn execute_config_command(json: bool, config: &Config) -> Result<ExitCode> {
    let effective = config.effective_config();

    if json {
        let entries: BTreeMap<&str, Entry<'_>> = effective
            .iter()
            .map(|(key, (value, source))| (key.as_str(), Entry { value, source }))
            .collect();
        println!("{}", emit_jcs(&entries)?);
        return Ok(ExitCode::SUCCESS);
    }

    let width = effective.keys().map(String::len).max().unwrap_or(0);
    for (key, (value, source)) in &effective {
        println!("{key:<width$} = {value}  [{source}]");
    }
    Ok(ExitCode::SUCCESS)
}
