//! Console Commands

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::WebClient;
use crate::console::{BridgeConfig, ConsoleBridge, TungsteniteConnector};
use crate::output::{print_info, print_warning};

/// Attach to a server console. Lines typed on stdin are sent as commands;
/// `!up`/`!down` browse history, `!!` resends the selected entry and
/// `!reconnect` retries the live socket.
pub async fn execute(id: String, client: Arc<WebClient>) -> Result<()> {
    let bridge = ConsoleBridge::start(
        id.clone(),
        client,
        Arc::new(TungsteniteConnector),
        BridgeConfig::default(),
    );
    let mut changes = bridge.subscribe();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    print_info(&format!(
        "Console for {} (!up, !down, !!, !reconnect; Ctrl-D to exit)",
        id
    ));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut next_seq = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                for line in bridge.lines_since(next_seq) {
                    println!("{}", line.text);
                    next_seq = line.seq + 1;
                }
            }
            line = input.next_line() => match line? {
                None => break,
                Some(line) => match line.trim() {
                    "!up" => match bridge.history_up() {
                        Some(command) => print_info(&format!("history: {}", command)),
                        None => print_info("history is empty"),
                    },
                    "!down" => {
                        let command = bridge.history_down();
                        if command.is_empty() {
                            print_info("history: (new input)");
                        } else {
                            print_info(&format!("history: {}", command));
                        }
                    }
                    "!!" => match bridge.history_selected() {
                        Some(command) => {
                            bridge.submit(&command);
                        }
                        None => print_warning("No history entry selected (use !up)"),
                    },
                    "!reconnect" => bridge.reconnect(),
                    command => {
                        bridge.submit(command);
                    }
                },
            },
        }
    }

    bridge.shutdown().await;
    Ok(())
}
