//! BitDrive interactive client
//!
//! Reads one selector per line (`L U D X V Q`), runs the matching command
//! against the server and prints one outcome line per command.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use bitdrive::cli::{log_level, ClientOpts};
use bitdrive::{Client, Selector, SessionError};

const RULE: &str = "----------------------------------------------";

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let opts = ClientOpts::parse();
    env_logger::Builder::new()
        .filter_level(log_level(opts.verbose))
        .parse_default_env()
        .init();

    let config = opts.resolve()?.validate()?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(config))
}

async fn run(config: bitdrive::ClientConfig) -> Result<()> {
    let target = config.address();
    let mut client = match Client::connect(config).await {
        Ok(c) => c,
        Err(SessionError::ServerBusy) => {
            println!("Server {} is busy. Try again later.", target);
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("connect {}", target)),
    };
    println!("Connected to: {}", target);
    print_commands();

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("\nWhat would you like to do?");
        let Some(line) = prompt(&mut input).await? else {
            // stdin closed: leave politely
            client.quit().await?;
            return Ok(());
        };
        let Some(selector) = Selector::parse(&line) else {
            // Unknown selectors go to the server, which answers with its own message.
            println!("{}", client.send_raw(line.trim()).await?);
            continue;
        };

        let result = match selector {
            Selector::Help => {
                print_commands();
                Ok(())
            }
            Selector::Quit => {
                println!("{}", client.quit().await?);
                println!("Thank you for using BitDrive!");
                return Ok(());
            }
            Selector::List => client.list().await.map(|listing| {
                println!("Here are the list of files:");
                println!("{}", RULE);
                print!("{}", listing.encode());
                println!("{}", RULE);
            }),
            Selector::Upload => match ask(&mut input, "What file do you want to upload?").await? {
                Some(name) => client.upload(&name).await.map(|o| println!("{}", o)),
                None => Ok(()),
            },
            Selector::Download => match ask(&mut input, "What file do you want to download?").await? {
                Some(name) => client.download(&name).await.map(|o| println!("{}", o)),
                None => Ok(()),
            },
            Selector::Delete => match ask(&mut input, "Which file would you like to delete?").await? {
                Some(name) => client.delete(&name).await.map(|o| println!("{}", o)),
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            println!("ERROR: {}", e);
            if e.is_fatal() {
                return Err(e).context("connection lost");
            }
        }
    }
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    let mut out = tokio::io::stdout();
    out.write_all(b"> ").await?;
    out.flush().await?;
    Ok(input.next_line().await?)
}

async fn ask(input: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<Option<String>> {
    println!("{}", question);
    Ok(prompt(input)
        .await?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn print_commands() {
    println!("\nCommands:");
    println!("==================================================================");
    println!("[L] LIST: List the names of the files currently stored in the server.");
    println!("[U] UPLOAD: Upload a file to the server.");
    println!("[D] DOWNLOAD: Download a file from the server.");
    println!("[X] DELETE: Delete a file from the server.");
    println!("[V] VIEW: View list of commands.");
    println!("[Q] QUIT: Exit BitDrive.");
}
