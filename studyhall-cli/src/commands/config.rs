use std::fs;
use std::io::Write;

use anyhow::{Context, bail};
use shared::config::ChatConfig;

/// Generates a default configuration file in the current directory.
///
/// # Arguments
/// * `format` - The format of the configuration file ("yaml", "json" or "toml").
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> anyhow::Result<()> {
    let file_name = match format {
        "yaml" => "studyhall.yaml",
        "json" => "studyhall.json",
        "toml" => "studyhall.toml",
        other => bail!("Unsupported format '{other}'. Use 'yaml', 'json' or 'toml'."),
    };

    let serialized = ChatConfig::with_defaults().render(format)?;
    let mut file = fs::File::create(file_name).with_context(|| format!("failed to create {file_name}"))?;
    file.write_all(serialized.as_bytes())?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
