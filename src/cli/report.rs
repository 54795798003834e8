use anyhow::Result;

use crate::cli::flag_value;
use crate::core::policy;
use crate::core::store::{ReportStore, parse_stamp};
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

pub async fn run_report_command(args: &[String], store: &ReportStore) -> Result<i32> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "list" };

    match sub_cmd {
        "add" => run_add(args, store).await,
        "remove" | "rm" => run_remove(args, store).await,
        "rename" => run_rename(args, store).await,
        "interval" => run_interval(args, store).await,
        "list" | "ls" => {
            let json = args.iter().any(|a| a == "--json");
            run_list(store, json).await
        }
        _ => {
            GuideSection::new("flexfetch report")
                .command("add", "Track a report        <id> --name <n> [--category <c>] [--interval <h>]")
                .command("remove", "Stop tracking         <id>")
                .command("rename", "Rename a report       <id> --name <n>")
                .command("interval", "Set min fetch hours   <id> [hours] [--unset]")
                .command("list", "List tracked reports  [--json]")
                .blank()
                .text(&format!("Categories: {}", policy::valid_categories().join(", ")))
                .print();
            println!();
            Ok(1)
        }
    }
}

struct AddArgs {
    id: Option<String>,
    name: Option<String>,
    category: String,
    interval: Option<String>,
}

fn parse_add_args(args: &[String], start: usize) -> AddArgs {
    let mut parsed = AddArgs {
        id: None,
        name: None,
        category: "activity".to_string(),
        interval: None,
    };
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--name" | "-n" => parsed.name = flag_value(args, &mut i),
            "--category" | "--type" => {
                if let Some(c) = flag_value(args, &mut i) {
                    parsed.category = c;
                }
            }
            "--interval" => parsed.interval = flag_value(args, &mut i),
            other => {
                if parsed.id.is_none() && !other.starts_with('-') {
                    parsed.id = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    parsed
}

/// Interval overrides must be positive whole hours.
fn parse_interval_hours(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|h| *h > 0)
}

async fn run_add(args: &[String], store: &ReportStore) -> Result<i32> {
    let parsed = parse_add_args(args, 3);
    let (Some(id), Some(name)) = (parsed.id, parsed.name) else {
        print_error("Usage: flexfetch report add <id> --name \"Report name\"");
        return Ok(1);
    };
    if !policy::valid_categories().contains(&parsed.category.as_str()) {
        print_error(&format!(
            "Invalid category '{}'. Valid categories: {}",
            parsed.category,
            policy::valid_categories().join(", ")
        ));
        return Ok(1);
    }
    let interval = match &parsed.interval {
        Some(raw) => match parse_interval_hours(raw) {
            Some(h) => Some(h),
            None => {
                print_error("Error: --interval must be a positive number of hours");
                return Ok(1);
            }
        },
        None => None,
    };

    store
        .add_definition(&id, &name, &parsed.category, interval)
        .await?;
    let mut msg = format!("Report {} added ({}).", id, parsed.category);
    if let Some(h) = interval {
        msg.push_str(&format!(" Min interval: {}h.", h));
    }
    print_success(&msg);
    Ok(0)
}

async fn run_remove(args: &[String], store: &ReportStore) -> Result<i32> {
    let Some(id) = args.get(3) else {
        print_error("Usage: flexfetch report remove <id>");
        return Ok(1);
    };
    if store.remove_definition(id).await? {
        print_success(&format!("Report {} removed.", id));
        Ok(0)
    } else {
        print_error(&format!("Report {} not found.", id));
        Ok(1)
    }
}

async fn run_rename(args: &[String], store: &ReportStore) -> Result<i32> {
    let mut id: Option<String> = None;
    let mut name: Option<String> = None;
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--name" | "-n" => name = flag_value(args, &mut i),
            other => {
                if id.is_none() && !other.starts_with('-') {
                    id = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    let (Some(id), Some(name)) = (id, name) else {
        print_error("Usage: flexfetch report rename <id> --name \"New name\"");
        return Ok(1);
    };
    if store.rename_definition(&id, &name).await? {
        print_success(&format!("Report {} renamed to '{}'.", id, name));
        Ok(0)
    } else {
        print_error(&format!("Report {} not found.", id));
        Ok(1)
    }
}

async fn run_interval(args: &[String], store: &ReportStore) -> Result<i32> {
    let mut id: Option<String> = None;
    let mut hours: Option<String> = None;
    let mut unset = false;
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--unset" => {
                unset = true;
                i += 1;
            }
            other => {
                if id.is_none() && !other.starts_with('-') {
                    id = Some(other.to_string());
                } else if hours.is_none() && !other.starts_with('-') {
                    hours = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    let Some(id) = id else {
        print_error("Usage: flexfetch report interval <id> [hours] [--unset]");
        return Ok(1);
    };
    let Some(definition) = store.get_definition(&id).await? else {
        print_error(&format!("Report {} not found.", id));
        return Ok(1);
    };

    if unset {
        store.set_definition_interval(&id, None).await?;
        let default = policy::category_default_hours(&definition.category);
        print_success(&format!(
            "Report {} will use the category default ({}h).",
            id, default
        ));
        return Ok(0);
    }

    match hours {
        Some(raw) => match parse_interval_hours(&raw) {
            Some(h) => {
                store.set_definition_interval(&id, Some(h)).await?;
                print_success(&format!("Report {} min interval set to {}h.", id, h));
                Ok(0)
            }
            None => {
                print_error("Error: interval must be a positive number of hours");
                Ok(1)
            }
        },
        None => {
            match definition.interval_hours {
                Some(h) => print_info(&format!("Report {} min interval: {}h", id, h)),
                None => print_info(&format!(
                    "Report {} uses the category default interval.",
                    id
                )),
            }
            Ok(0)
        }
    }
}

pub async fn run_list(store: &ReportStore, json: bool) -> Result<i32> {
    let reports = store.list_definitions_with_status().await?;

    if reports.is_empty() {
        if json {
            println!("[]");
        } else {
            print_info(
                "No reports tracked. Add one with 'flexfetch report add <id> --name \"Report name\"'",
            );
        }
        return Ok(0);
    }

    if json {
        let mut items = Vec::with_capacity(reports.len());
        for report in &reports {
            let d = &report.definition;
            let mut item = serde_json::to_value(report)?;
            item["effective_interval"] = serde_json::json!(policy::effective_interval_hours(
                &d.category,
                d.interval_hours
            ));
            items.push(item);
        }
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(0);
    }

    println!(
        "{:<10} {:<35} {:<20} {:<10} {:<20} {:<10}",
        "ID", "Name", "Category", "Interval", "Last Fetch", "Status"
    );
    println!(
        "{} {} {} {} {} {}",
        "-".repeat(10),
        "-".repeat(35),
        "-".repeat(20),
        "-".repeat(10),
        "-".repeat(20),
        "-".repeat(10)
    );

    for report in &reports {
        let d = &report.definition;
        let name: String = d.display_name().chars().take(35).collect();
        let interval = format!(
            "{}h",
            policy::effective_interval_hours(&d.category, d.interval_hours)
        );

        let (last, status) = match &report.latest_request {
            Some(req) => {
                let ts = req.completed_at.as_deref().or(req.requested_at.as_deref());
                let rendered = ts
                    .and_then(parse_stamp)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "?".to_string());
                (rendered, req.status.as_str().to_string())
            }
            None => ("Never".to_string(), "-".to_string()),
        };

        println!(
            "{:<10} {:<35} {:<20} {:<10} {:<20} {:<10}",
            d.id, name, d.category, interval, last, status
        );
    }
    Ok(0)
}
