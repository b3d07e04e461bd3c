//! Interactive client for a WorkVault server
//!
//! Provides a command-line interface for sending requests to the server

use std::env;
use std::io::{self, Write};
use workvault::{Client, Response};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let server_addr = args.get(1).cloned().unwrap_or_else(|| "127.0.0.1:8080".to_string());

    let client = Client::new(server_addr.clone());
    println!("Checking WorkVault server at {}...", server_addr);
    client.ping().await?;
    println!("Connected! Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                print_help();
            }
            _ => {
                if let Err(e) = handle_command(&client, input).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn handle_command(client: &Client, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (command, rest) = match input.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    };

    match command {
        "create" => {
            if rest.is_empty() {
                println!("Usage: create <payload>");
                return Ok(());
            }

            let id = client.create(rest.as_bytes()).await?;
            println!("Created record {}", id);
        }
        "read" | "get" => {
            let Ok(id) = rest.parse::<u64>() else {
                println!("Usage: read <id>");
                return Ok(());
            };

            match client.read(id).await? {
                Some(payload) => println!("{}", String::from_utf8_lossy(&payload)),
                None => println!("(not found)"),
            }
        }
        "all" | "read_all" => {
            let records = client.read_all().await?;
            if records.is_empty() {
                println!("(empty)");
            }
            for record in records {
                println!("{}: {}", record.id, String::from_utf8_lossy(&record.payload));
            }
        }
        "update" => {
            let parsed = rest
                .split_once(' ')
                .and_then(|(id, payload)| Some((id.parse::<u64>().ok()?, payload.trim())));
            let Some((id, payload)) = parsed.filter(|(_, payload)| !payload.is_empty()) else {
                println!("Usage: update <id> <payload>");
                return Ok(());
            };

            if client.update(id, payload.as_bytes()).await? {
                println!("OK");
            } else {
                println!("Record not found");
            }
        }
        "delete" | "del" => {
            let Ok(id) = rest.parse::<u64>() else {
                println!("Usage: delete <id>");
                return Ok(());
            };

            if client.delete(id).await? {
                println!("OK");
            } else {
                println!("Record not found");
            }
        }
        "raw" => match client.send_raw(rest.as_bytes()).await? {
            Response::Error(e) => println!("ERROR {}", e),
            response => println!("{:?}", response),
        },
        _ => {
            println!("Unknown command: {}. Type 'help' for available commands.", command);
        }
    }

    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!("  create <payload>       - Store a new record");
    println!("  read <id>              - Show a record's payload");
    println!("  all                    - List every record");
    println!("  update <id> <payload>  - Replace a record's payload");
    println!("  delete <id>            - Delete a record");
    println!("  raw <request>          - Send a raw protocol line");
    println!("  help                   - Show this help message");
    println!("  quit                   - Exit the client");
}
