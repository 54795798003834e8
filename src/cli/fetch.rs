use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS, MAX_ATTEMPTS_KEY, OUTPUT_DIR_KEY,
    POLL_INTERVAL_KEY,
};
use crate::cli::flag_value;
use crate::core::fetcher::{FetchOptions, FetchTarget, Fetcher};
use crate::core::service::FlexWebClient;
use crate::core::store::{ReportStore, default_data_dir};
use crate::core::terminal::print_error;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FetchFlags {
    pub report: Option<String>,
    pub force: bool,
    pub output: Option<String>,
    pub output_dir: Option<String>,
    pub poll_interval: Option<String>,
    pub max_attempts: Option<String>,
}

pub(crate) fn parse_fetch_flags(args: &[String], start: usize) -> FetchFlags {
    let mut flags = FetchFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--report" | "--query" | "-r" => flags.report = flag_value(args, &mut i),
            "--force" | "-f" => {
                flags.force = true;
                i += 1;
            }
            "--output" | "-o" => flags.output = flag_value(args, &mut i),
            "--output-dir" => flags.output_dir = flag_value(args, &mut i),
            "--poll-interval" => flags.poll_interval = flag_value(args, &mut i),
            "--max-attempts" => flags.max_attempts = flag_value(args, &mut i),
            _ => i += 1,
        }
    }
    flags
}

/// Flag value if given, else the stored default, else the built-in.
/// A non-numeric value from either source is rejected up front.
async fn effective_number<T: std::str::FromStr>(
    store: &ReportStore,
    flag: Option<&String>,
    config_key: &str,
    built_in: T,
) -> Result<T, String> {
    if let Some(raw) = flag {
        return raw
            .parse()
            .map_err(|_| format!("Error: {} must be a number", config_key));
    }
    match store.get_config(config_key).await {
        Ok(Some(raw)) => raw
            .parse()
            .map_err(|_| format!("Error: stored {} must be a number", config_key)),
        _ => Ok(built_in),
    }
}

async fn build_options(flags: &FetchFlags, store: &ReportStore) -> Result<FetchOptions, String> {
    let target = match flags.report.as_deref() {
        None | Some("all") => FetchTarget::All,
        Some(id) => FetchTarget::One(id.to_string()),
    };

    let poll_interval_secs = effective_number(
        store,
        flags.poll_interval.as_ref(),
        POLL_INTERVAL_KEY,
        DEFAULT_POLL_INTERVAL_SECS,
    )
    .await?;
    let max_attempts = effective_number(
        store,
        flags.max_attempts.as_ref(),
        MAX_ATTEMPTS_KEY,
        DEFAULT_MAX_ATTEMPTS,
    )
    .await?;

    let output_dir = match &flags.output_dir {
        Some(dir) => PathBuf::from(dir),
        None => match store.get_config(OUTPUT_DIR_KEY).await {
            Ok(Some(dir)) => PathBuf::from(dir),
            _ => default_data_dir(),
        },
    };

    Ok(FetchOptions {
        target,
        force: flags.force,
        output: flags.output.clone(),
        output_dir,
        poll_interval_secs,
        max_attempts,
    })
}

pub async fn run_fetch_command(args: &[String], store: &ReportStore) -> Result<i32> {
    let flags = parse_fetch_flags(args, 2);
    let opts = match build_options(&flags, store).await {
        Ok(opts) => opts,
        Err(msg) => {
            print_error(&msg);
            return Ok(1);
        }
    };

    let Some(token) = store.get_token().await? else {
        print_error("No token found. Set one with 'flexfetch token set <token>'");
        return Ok(1);
    };

    let service = Arc::new(FlexWebClient::new(token));
    let fetcher = Fetcher::new(store.clone(), service);
    match fetcher.run(&opts).await {
        Ok(summary) if summary.ok() => Ok(0),
        Ok(summary) => {
            print_error(&format!(
                "{} of {} reports failed.",
                summary.failures.len(),
                summary.failures.len() + summary.downloaded + summary.skipped
            ));
            Ok(1)
        }
        Err(e) => {
            print_error(&format!("{}", e));
            Ok(1)
        }
    }
}
