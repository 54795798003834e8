use anyhow::Result;
use console::style;

use crate::core::policy;
use crate::core::store::{ReportStore, default_data_dir};
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

pub(crate) const OUTPUT_DIR_KEY: &str = "default_output_dir";
pub(crate) const POLL_INTERVAL_KEY: &str = "default_poll_interval";
pub(crate) const MAX_ATTEMPTS_KEY: &str = "default_max_attempts";

pub(crate) const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 20;

const NUMERIC_KEYS: &[&str] = &[POLL_INTERVAL_KEY, MAX_ATTEMPTS_KEY];
const KNOWN_KEYS: &[&str] = &[OUTPUT_DIR_KEY, POLL_INTERVAL_KEY, MAX_ATTEMPTS_KEY];

pub async fn run_config_command(args: &[String], store: &ReportStore) -> Result<i32> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "list" };

    match sub_cmd {
        "set" => {
            let (Some(key), Some(value)) = (args.get(3), args.get(4)) else {
                print_error("Usage: flexfetch config set <key> <value>");
                return Ok(1);
            };
            if !KNOWN_KEYS.contains(&key.as_str()) {
                print_error(&format!(
                    "Unknown setting '{}'. Valid keys: {}",
                    key,
                    KNOWN_KEYS.join(", ")
                ));
                return Ok(1);
            }
            if NUMERIC_KEYS.contains(&key.as_str()) && value.parse::<u64>().is_err() {
                print_error(&format!("Error: {} must be a number", key));
                return Ok(1);
            }
            store.set_config(key, value).await?;
            print_success(&format!("Set {} = {}", key, value));
            Ok(0)
        }
        "get" => {
            match args.get(3) {
                Some(key) => match store.get_config(key).await? {
                    Some(value) => println!("{} = {}", key, value),
                    None => println!("{} is not set", key),
                },
                None => {
                    let settings = store.list_config().await?;
                    if settings.is_empty() {
                        print_info("No configuration values set");
                    } else {
                        for (key, value) in settings {
                            println!("{} = {}", key, value);
                        }
                    }
                }
            }
            Ok(0)
        }
        "unset" => {
            let Some(key) = args.get(3) else {
                print_error("Usage: flexfetch config unset <key>");
                return Ok(1);
            };
            if store.unset_config(key).await? {
                print_success(&format!("Unset {}", key));
            } else {
                print_info(&format!("{} was not set", key));
            }
            Ok(0)
        }
        "list" => {
            let current: std::collections::HashMap<String, String> =
                store.list_config().await?.into_iter().collect();
            let defaults = [
                (OUTPUT_DIR_KEY, default_data_dir().display().to_string()),
                (POLL_INTERVAL_KEY, DEFAULT_POLL_INTERVAL_SECS.to_string()),
                (MAX_ATTEMPTS_KEY, DEFAULT_MAX_ATTEMPTS.to_string()),
            ];

            println!("Configuration settings:");
            println!("({} indicates non-default value)\n", style("*").bold());
            for (key, default_value) in defaults {
                match current.get(key) {
                    Some(value) if *value != default_value => {
                        println!("{} {} = {}", style("*").bold(), key, value)
                    }
                    Some(value) => println!("  {} = {}", key, value),
                    None => println!("  {} = {} (default)", key, default_value),
                }
            }

            let mut section = GuideSection::new("Category interval defaults");
            for (category, hours) in policy::CATEGORY_INTERVAL_DEFAULTS {
                section = section.status(category, &format!("{}h", hours));
            }
            section.print();
            println!();
            Ok(0)
        }
        _ => {
            GuideSection::new("flexfetch config")
                .command("set", "Set a default         <key> <value>")
                .command("get", "Show value(s)         [key]")
                .command("unset", "Remove a default      <key>")
                .command("list", "List all settings with defaults")
                .blank()
                .text(&format!("Keys: {}", KNOWN_KEYS.join(", ")))
                .print();
            println!();
            Ok(1)
        }
    }
}
