#![forbid(unsafe_code)]
//! Command-line client for a VanillaChain node.
//!
//! Speaks the framed protocol directly. `register` generates the recovery
//! words client-side and prints them once; `mine-block` grinds a nonce until
//! the block hash meets the requested difficulty before submitting.

use clap::{Parser, Subcommand};
use tokio::net::TcpStream;
use vanillachain::block::BlockSubmission;
use vanillachain::crypto;
use vanillachain::protocol::{read_frame, write_frame, DISCONNECT_MESSAGE};
use vanillachain::wordlist;

#[derive(Parser)]
#[command(name = "vanilla-client", about = "Client for a VanillaChain node")]
struct Args {
    /// Node address.
    #[arg(long, default_value = "127.0.0.1:5050")]
    node: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query an account balance.
    Balance { username: String },
    /// Send coins to another account.
    Send { from: String, to: String, amount: String },
    /// Show transaction history.
    History { username: String },
    /// Check whether a username is still available.
    Check { username: String },
    /// Register a new account; recovery words are generated and printed.
    Register {
        username: String,
        password: String,
        /// Hardware identifiers as JSON, e.g. {"cpu_id":"..","ram_id":"..","disk_serial":".."}
        #[arg(long)]
        hardware: Option<String>,
    },
    /// Log in to an existing account.
    Login {
        username: String,
        password: String,
        /// Comma-separated recovery words, only needed after a device change.
        #[arg(long)]
        words: Option<String>,
        #[arg(long)]
        hardware: Option<String>,
    },
    /// Administrative simulated mining (credits the block reward directly).
    Mine {
        username: String,
        #[arg(default_value_t = 10)]
        seconds: u64,
    },
    /// Administrative balance injection.
    Airdrop { username: String, amount: String },
    /// Grind a nonce until the block hash meets the difficulty, then submit.
    MineBlock {
        miner: String,
        /// Identifier the new block should take (chain tail + 1).
        id: u64,
        /// Hash of the current chain tail, or "none" for the first block.
        previous_hash: String,
        /// Leading zero characters to grind for.
        #[arg(long, default_value_t = 2)]
        difficulty: u32,
        #[arg(long, default_value = "none")]
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let message = build_message(args.command);

    let mut stream = TcpStream::connect(&args.node).await?;
    write_frame(&mut stream, &message).await?;
    match read_frame(&mut stream).await? {
        Some(response) => println!("{}", response),
        None => eprintln!("Node closed the connection without responding"),
    }
    write_frame(&mut stream, DISCONNECT_MESSAGE).await?;
    Ok(())
}

fn build_message(command: Command) -> String {
    match command {
        Command::Balance { username } => format!("GET_BALANCE|{}", username),
        Command::Send { from, to, amount } => {
            format!("SEND_TRANSACTION|{}|{}|{}", from, to, amount)
        }
        Command::History { username } => format!("GET_HISTORY|{}", username),
        Command::Check { username } => format!("CHECK_USERNAME|{}", username),
        Command::Register { username, password, hardware } => {
            let words = wordlist::generate();
            println!("Recovery words (write these down, they are not shown again):");
            println!("  {}", words.join(" "));
            let words_json = serde_json::to_string(&words).expect("word list serializes");
            format!(
                "REGISTER|{}|{}|{}|{}",
                username,
                password,
                words_json,
                hardware.unwrap_or_default()
            )
        }
        Command::Login { username, password, words, hardware } => {
            let words_json = match words {
                Some(list) => {
                    let split: Vec<String> =
                        list.split(',').map(|w| w.trim().to_string()).collect();
                    serde_json::to_string(&split).expect("word list serializes")
                }
                None => String::new(),
            };
            format!(
                "LOGIN|{}|{}|{}|{}",
                username,
                password,
                words_json,
                hardware.unwrap_or_default()
            )
        }
        Command::Mine { username, seconds } => format!("MINE|{}|{}", username, seconds),
        Command::Airdrop { username, amount } => format!("AIR_DROP|{}|{}", username, amount),
        Command::MineBlock { miner, id, previous_hash, difficulty, payload } => {
            let (text, hash) = grind(miner, id, previous_hash, difficulty, payload);
            format!("{}|||{}", text, hash)
        }
    }
}

fn grind(
    miner: String,
    id: u64,
    previous_hash: String,
    difficulty: u32,
    payload: String,
) -> (String, String) {
    let prefix = "0".repeat(difficulty as usize);
    let mut submission = BlockSubmission {
        id,
        nonce: String::new(),
        previous_hash,
        miner,
        payload,
    };
    for nonce in 0u64.. {
        submission.nonce = nonce.to_string();
        let text = submission.canonical_text();
        let hash = crypto::hash_single(&text);
        if hash.starts_with(&prefix) {
            println!("Found nonce {} after {} attempts", submission.nonce, nonce + 1);
            return (text, hash);
        }
    }
    unreachable!("nonce space exhausted")
}
