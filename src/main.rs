// This is my entry point for a mesh-chain node
// I take the node identity and the peers to join from the startup flags; after
// that I drive the node from a line-oriented console on stdin and answer in JSON.
use clap::Parser;
use log::{error, info, LevelFilter};
use mesh_chain::{BlockchainError, Config, ConsoleCommand, Opt, Server};
use serde::Serialize;
use serde_json::json;
use std::io::{self, BufRead};
use std::process;

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(opt.config.as_deref())?;
    opt.apply(&mut config);

    let server = Server::start(&config)?;
    for peer in opt.peers.iter().cloned() {
        server.add_peer(peer.into_node())?;
    }
    if let Some(height) = opt.sync {
        server.sync(height);
    }

    console(&server)?;
    info!("Shutting down");
    server.shutdown();
    Ok(())
}

fn console(server: &Server) -> io::Result<()> {
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => execute(server, command),
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

fn execute(server: &Server, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Blocks => print_json(&server.list_blocks()),
        ConsoleCommand::Peers => print_json(&server.list_peers()),
        ConsoleCommand::Block(id) => print_json(&server.get_block(&id)),
        ConsoleCommand::Mine(data) => match server.submit_data(&data) {
            // the miner thread is left to finish on its own
            Ok(_) => print_json(&json!({ "status": "mining", "data": data })),
            Err(BlockchainError::MiningBusy) => print_json(&json!({ "error": "already mining" })),
            Err(e) => print_json(&json!({ "error": e.to_string() })),
        },
        ConsoleCommand::Peer(peer) => match server.add_peer(peer.into_node()) {
            Ok(()) => print_json(&server.list_peers()),
            Err(e) => print_json(&json!({ "error": e.to_string() })),
        },
        ConsoleCommand::Sync(height) => {
            server.sync(height);
            print_json(&json!({ "status": "synced", "height": height }));
        }
        ConsoleCommand::Modify { height, data } => {
            server.modify(height, &data);
            print_json(&json!({ "status": "sent", "height": height }));
        }
        ConsoleCommand::Check => print_json(&server.check()),
        ConsoleCommand::Info => print_json(&json!({ "version": server.info() })),
        ConsoleCommand::Quit => {}
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => error!("Failed to encode response: {e}"),
    }
}
