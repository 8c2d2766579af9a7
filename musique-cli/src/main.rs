//! Standalone binary for the musique peer-coordination service.
//!
//! Flags mirror the original server's `-ip`/`-nick`/`-port`/`-logs` set;
//! once the node is up, an interactive operator REPL on stdin exposes
//! the host-facing facade (`discover`, `list`, `trigger`, `timeout`,
//! `scan`, `quit`).

use std::io::{self, BufRead, Write};

use clap::Parser;

use musique_common::logging::{Component, Logger};
use musique_node::config::{LoggingConfig, NodeConfig};
use musique_node::discovery::sweep;
use musique_node::MusiqueNode;

#[derive(Parser, Debug)]
#[command(name = "musique", about = "LAN peer-coordination and synchronized-trigger service")]
struct Cli {
    /// IP where the server will listen. Default: all interfaces.
    #[arg(long = "ip", default_value = "")]
    ip: String,

    /// Name used to recognize this server to its peers.
    #[arg(long = "nick")]
    nick: String,

    /// TCP port this node receives connections on. 0 lets the OS assign one.
    #[arg(long = "port", default_value_t = 8081)]
    port: u16,

    /// Target file for logs. Default: stdout.
    #[arg(long = "logs")]
    logs: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::new();
    if let Some(path) = &cli.logs {
        logging = logging.with_file(path);
    }
    logging.apply()?;

    let logger = Logger::new_root(Component::Cli);

    let config = NodeConfig::new(cli.nick).with_bind_ip(cli.ip).with_bind_port(cli.port);
    logger.info(format!("starting: {config}"));

    let node = MusiqueNode::server_init(config).await?;
    logger.info(format!("listening on port {}", node.port()));

    run_repl(&node, &logger).await;

    Ok(())
}

async fn run_repl(node: &MusiqueNode, logger: &Logger) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let Some(Ok(line)) = lines.next() else { break };
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command {
            "" => continue,
            "discover" => {
                if let Err(e) = node.discover().await {
                    logger.warn(format!("discover failed: {e}"));
                }
            }
            "scan" => {
                let networks = sweep::available_networks();
                let mut hits = sweep::tcp_hosts(networks, vec![8081]);
                println!("scanning...");
                while let Some(hit) = hits.recv().await {
                    println!("{}@{} ({})", hit.nick, hit.address, hit.version);
                }
                println!("scan done");
            }
            "list" => node.list_known_remotes(),
            "trigger" => node.server_begin_protocol().await,
            "sync" => node.synchronize_hosts_with_remotes().await,
            "timeout" => match rest.parse::<i64>() {
                Ok(ms) => node.set_timeout(ms),
                Err(_) => println!("usage: timeout <milliseconds>"),
            },
            "quit" | "exit" => break,
            other => println!("unknown command: {other}"),
        }
    }
}
