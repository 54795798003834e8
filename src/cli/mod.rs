mod config;
mod fetch;
mod report;
mod token;

use anyhow::Result;
use console::style;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::core::store::{ReportStore, default_data_dir};
use crate::core::terminal::{self, GuideSection};

fn print_help() {
    GuideSection::new("Reports")
        .command("report", "Track, rename and list report definitions")
        .command("fetch", "Download due (or forced) reports")
        .command("status", "Show all reports with their latest download")
        .print();

    GuideSection::new("Setup")
        .command("token", "Manage the service access token")
        .command("config", "Manage default settings")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("flexfetch").green()
    );
}

/// Read the value following a flag, advancing the cursor. Returns
/// `None` when the flag is last on the line.
pub(crate) fn flag_value(args: &[String], i: &mut usize) -> Option<String> {
    if *i + 1 < args.len() {
        let value = args[*i + 1].clone();
        *i += 2;
        Some(value)
    } else {
        *i += 1;
        None
    }
}

pub async fn run_main() -> Result<i32> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let args: Vec<String> = std::env::args().collect();

    let data_dir = default_data_dir();
    let store = ReportStore::open(&data_dir)?;

    if args.len() < 2 {
        print_help();
        terminal::print_status("Database", &store.db_path().display().to_string());
        terminal::print_status("Default output directory", &data_dir.display().to_string());
        return Ok(1);
    }

    match args[1].as_str() {
        "token" => token::run_token_command(&args, &store).await,
        "report" | "query" => report::run_report_command(&args, &store).await,
        "status" => report::run_list(&store, false).await,
        "config" => config::run_config_command(&args, &store).await,
        "fetch" | "download" => fetch::run_fetch_command(&args, &store).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(0)
        }
        cmd => {
            terminal::print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::flag_value;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flag_value_reads_following_token() {
        let args = argv(&["flexfetch", "fetch", "--output-dir", "/tmp/reports"]);
        let mut i = 2;
        assert_eq!(flag_value(&args, &mut i).as_deref(), Some("/tmp/reports"));
        assert_eq!(i, 4);
    }

    #[test]
    fn flag_value_handles_trailing_flag() {
        let args = argv(&["flexfetch", "fetch", "--output-dir"]);
        let mut i = 2;
        assert_eq!(flag_value(&args, &mut i), None);
        assert_eq!(i, 3);
    }
}
