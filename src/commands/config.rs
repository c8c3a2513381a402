use clap::ValueEnum;

use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Table,
    Json,
}

/// Print the effective config as dotted keys. Secrets stay masked unless
/// `show_secrets` is set.
pub fn show_config(config: &Config, format: ConfigFormat, show_secrets: bool) -> Result<()> {
    let values = config.flatten(show_secrets)?;
    match format {
        ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(&values)?),
        ConfigFormat::Table => {
            let width = values.keys().map(String::len).max().unwrap_or(0);
            println!("{:width$}  VALUE", "KEY");
            for (key, value) in &values {
                println!("{key:width$}  {value}");
            }
        }
    }
    Ok(())
}
