use anyhow::Result;

use crate::core::store::ReportStore;
use crate::core::terminal::{GuideSection, print_error, print_status, print_success};

pub async fn run_token_command(args: &[String], store: &ReportStore) -> Result<i32> {
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "get" };

    match sub_cmd {
        "set" => {
            let Some(token) = args.get(3) else {
                print_error("Usage: flexfetch token set <token>");
                return Ok(1);
            };
            store.set_token(token).await?;
            print_success("Token set successfully.");
            Ok(0)
        }
        "get" => match store.get_token().await? {
            Some(token) => {
                print_status("Stored token", &token);
                Ok(0)
            }
            None => {
                print_error("No token found. Set one with 'flexfetch token set <token>'");
                Ok(1)
            }
        },
        "unset" => {
            store.unset_token().await?;
            print_success("Token removed.");
            Ok(0)
        }
        _ => {
            GuideSection::new("flexfetch token")
                .command("set", "Store the service access token  <token>")
                .command("get", "Display the stored token")
                .command("unset", "Remove the stored token")
                .print();
            println!();
            Ok(1)
        }
    }
}
